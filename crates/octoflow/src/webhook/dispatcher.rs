//! Handler registry and event dispatch.
//!
//! Handlers are registered against event patterns. When an event is
//! dispatched, every handler whose pattern matches the event's base name, its
//! qualified name, or the wildcard runs exactly once, in registration order.
//! A failing or panicking handler never prevents the others from running;
//! all failures are collected into a single [`AggregateError`].

use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info_span, warn, Instrument};

use super::event::{EventEnvelope, EventName, EventPattern, WebhookDelivery};
use super::handler::{Context, ErrorHandler, EventHandler};
use super::validation::SignatureVerifier;
use crate::client::ClientFactory;
use crate::error::{
    AggregateError, AuthError, BoxError, DispatchError, HandlerError, ValidationError,
};
use crate::subscription::SubscriptionChecker;

/// Pattern name reserved for delivery error observers.
const ERROR_PATTERN: &str = "error";

// ============================================================================
// Pattern Input
// ============================================================================

/// Anything that names one or more event patterns.
///
/// Implemented for single names (`"issues"`, `"issues.opened"`, `"*"`), lists
/// of names, and the typed [`EventName`] / [`EventPattern`].
pub trait IntoEventPatterns {
    fn into_event_patterns(self) -> Result<Vec<EventPattern>, ValidationError>;
}

impl IntoEventPatterns for &str {
    fn into_event_patterns(self) -> Result<Vec<EventPattern>, ValidationError> {
        Ok(vec![self.parse()?])
    }
}

impl IntoEventPatterns for String {
    fn into_event_patterns(self) -> Result<Vec<EventPattern>, ValidationError> {
        self.as_str().into_event_patterns()
    }
}

impl IntoEventPatterns for &[&str] {
    fn into_event_patterns(self) -> Result<Vec<EventPattern>, ValidationError> {
        self.iter().map(|name| name.parse()).collect()
    }
}

impl<const N: usize> IntoEventPatterns for [&str; N] {
    fn into_event_patterns(self) -> Result<Vec<EventPattern>, ValidationError> {
        self.as_slice().into_event_patterns()
    }
}

impl IntoEventPatterns for Vec<&str> {
    fn into_event_patterns(self) -> Result<Vec<EventPattern>, ValidationError> {
        self.as_slice().into_event_patterns()
    }
}

impl IntoEventPatterns for EventName {
    fn into_event_patterns(self) -> Result<Vec<EventPattern>, ValidationError> {
        Ok(vec![EventPattern::Event(self)])
    }
}

impl IntoEventPatterns for EventPattern {
    fn into_event_patterns(self) -> Result<Vec<EventPattern>, ValidationError> {
        Ok(vec![self])
    }
}

impl IntoEventPatterns for Vec<EventPattern> {
    fn into_event_patterns(self) -> Result<Vec<EventPattern>, ValidationError> {
        Ok(self)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct Registration {
    pattern: EventPattern,
    handler: Arc<dyn EventHandler>,
}

/// Routes events to registered handlers.
///
/// Registration and dispatch may interleave freely; a dispatch sees the
/// registrations present when it started matching.
///
/// # Examples
///
/// ```rust
/// use octoflow::webhook::{handler_fn, Context, EventDispatcher, EventEnvelope};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dispatcher = EventDispatcher::new();
/// dispatcher.on(
///     "issues.opened",
///     Arc::new(handler_fn(|context: Context| async move {
///         println!("issue opened in {:?}", context.repo());
///         Ok(())
///     })),
/// )?;
///
/// let envelope = EventEnvelope::parse("1", "issues", br#"{"action":"opened"}"#)?;
/// dispatcher.dispatch(envelope).await?;
/// # Ok(())
/// # }
/// ```
pub struct EventDispatcher {
    registrations: RwLock<Vec<Registration>>,
    error_handlers: RwLock<Vec<Arc<dyn ErrorHandler>>>,
    verifier: Option<SignatureVerifier>,
    clients: Option<Arc<ClientFactory>>,
    subscriptions: Option<Arc<SubscriptionChecker>>,
    wildcard_warned: AtomicBool,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            error_handlers: RwLock::new(Vec::new()),
            verifier: None,
            clients: None,
            subscriptions: None,
            wildcard_warned: AtomicBool::new(false),
        }
    }

    /// Verify deliveries passed to [`receive`](Self::receive) with this verifier.
    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Hand this factory to handlers through [`Context::client`].
    pub fn with_client_factory(mut self, clients: Arc<ClientFactory>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Check registered event names against the app's subscriptions.
    pub fn with_subscription_checker(mut self, checker: Arc<SubscriptionChecker>) -> Self {
        self.subscriptions = Some(checker);
        self
    }

    pub fn subscription_checker(&self) -> Option<&Arc<SubscriptionChecker>> {
        self.subscriptions.as_ref()
    }

    /// Register `handler` for one or more patterns.
    ///
    /// `"*"` is accepted but deprecated in favour of [`on_any`](Self::on_any);
    /// it logs a deprecation warning the first time it is used.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty pattern list, an unparseable
    /// pattern, or the reserved `"error"` name (use [`on_error`](Self::on_error)).
    pub fn on(
        &self,
        patterns: impl IntoEventPatterns,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), ValidationError> {
        let patterns = patterns.into_event_patterns()?;
        if patterns.is_empty() {
            return Err(ValidationError::Required {
                field: "event_name".to_string(),
            });
        }

        for pattern in &patterns {
            match pattern {
                EventPattern::Any => self.warn_wildcard(),
                EventPattern::Event(name) if name.base() == ERROR_PATTERN => {
                    return Err(ValidationError::InvalidFormat {
                        field: "event_name".to_string(),
                        message: "'error' is reserved; register error handlers with on_error"
                            .to_string(),
                    });
                }
                EventPattern::Event(_) => {}
            }
        }

        let mut registrations = write_lock(&self.registrations);
        for pattern in patterns {
            debug!(pattern = %pattern, "Registered event handler");
            registrations.push(Registration {
                pattern,
                handler: Arc::clone(&handler),
            });
        }
        Ok(())
    }

    /// Register `handler` for every event.
    pub fn on_any(&self, handler: Arc<dyn EventHandler>) {
        write_lock(&self.registrations).push(Registration {
            pattern: EventPattern::Any,
            handler,
        });
    }

    /// Register an observer for deliveries that fail verification or parsing.
    pub fn on_error(&self, handler: Arc<dyn ErrorHandler>) {
        write_lock(&self.error_handlers).push(handler);
    }

    /// Number of registrations (one per pattern per `on` call).
    pub fn registration_count(&self) -> usize {
        read_lock(&self.registrations).len()
    }

    /// Verify a raw delivery, then dispatch it.
    ///
    /// Verification or parse failures are reported to the error handlers and
    /// returned; no event handler runs for them.
    pub async fn receive(&self, delivery: &WebhookDelivery) -> Result<(), DispatchError> {
        let envelope = match &self.verifier {
            Some(verifier) => verifier.verify_delivery(delivery),
            None => Err(DispatchError::Authentication(AuthError::MissingSecret)),
        };

        match envelope {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => {
                warn!(
                    delivery_id = delivery.id.as_deref().unwrap_or("unknown"),
                    event = delivery.name.as_deref().unwrap_or("unknown"),
                    error = %e,
                    "Rejected webhook delivery"
                );
                self.notify_error_handlers(&e);
                Err(e)
            }
        }
    }

    /// Run every handler matching the envelope's qualified name.
    ///
    /// Resolves once all matched handlers have finished.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Handlers`] carrying every handler failure when
    /// at least one handler failed or panicked.
    pub async fn dispatch(&self, envelope: EventEnvelope) -> Result<(), DispatchError> {
        let event = Arc::new(envelope);
        let name = event.qualified_name();

        let span = info_span!(
            "event",
            id = %event.id,
            name = %name,
            repository = event.repository_full_name(),
            installation = event.installation_id().map(|id| id.as_u64()),
        );

        self.dispatch_inner(event, name).instrument(span).await
    }

    async fn dispatch_inner(
        &self,
        event: Arc<EventEnvelope>,
        name: EventName,
    ) -> Result<(), DispatchError> {
        let matched = self.matching(&name);
        if matched.is_empty() {
            return Ok(());
        }

        if let Some(checker) = &self.subscriptions {
            let mut checked = HashSet::new();
            for (pattern, _) in &matched {
                if let EventPattern::Event(registered) = pattern {
                    if checked.insert(registered.clone()) {
                        // Fire-and-forget; the outcome is only logged.
                        let _ = checker.spawn_check(registered);
                    }
                }
            }
        }

        debug!(handlers = matched.len(), "Dispatching event");

        let context = Context::new(Arc::clone(&event), self.clients.clone());
        let mut errors = Vec::new();
        for (_, handler) in matched {
            if let Err(source) = Self::run_handler(handler.as_ref(), &context).await {
                let handler_error = HandlerError {
                    event_id: event.id.clone(),
                    event_name: name.to_string(),
                    repository: event.repository_full_name().map(str::to_string),
                    installation: event.installation_id(),
                    source,
                };
                error!(error = %handler_error.source, "Event handler failed");
                errors.push(handler_error);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::Handlers(AggregateError {
                event_id: event.id.clone(),
                event_name: name.to_string(),
                errors,
            }))
        }
    }

    async fn run_handler(handler: &dyn EventHandler, context: &Context) -> Result<(), BoxError> {
        match AssertUnwindSafe(handler.handle(context)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(format!("handler panicked: {}", message).into())
            }
        }
    }

    /// Matching registrations, each handler once, in registration order.
    fn matching(&self, name: &EventName) -> Vec<(EventPattern, Arc<dyn EventHandler>)> {
        let registrations = read_lock(&self.registrations);
        let mut seen = HashSet::new();

        registrations
            .iter()
            .filter(|r| r.pattern.matches(name))
            .filter(|r| seen.insert(Arc::as_ptr(&r.handler) as *const () as usize))
            .map(|r| (r.pattern.clone(), Arc::clone(&r.handler)))
            .collect()
    }

    fn notify_error_handlers(&self, error: &DispatchError) {
        let handlers: Vec<_> = read_lock(&self.error_handlers).iter().cloned().collect();
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle_error(error))).is_err() {
                error!("Error handler panicked");
            }
        }
    }

    fn warn_wildcard(&self) {
        if !self.wildcard_warned.swap(true, Ordering::SeqCst) {
            warn!(
                "Registering handlers for \"*\" is deprecated and will be removed; use on_any instead"
            );
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("registrations", &self.registration_count())
            .field("error_handlers", &read_lock(&self.error_handlers).len())
            .field("verifier", &self.verifier)
            .finish()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
