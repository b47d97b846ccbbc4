//! Handler traits and the per-event context passed to handlers.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use super::event::{EventEnvelope, EventName, WebhookPayload};
use crate::auth::InstallationId;
use crate::client::{ClientFactory, GitHubClient};
use crate::error::{AuthError, BoxError, DispatchError};

/// Everything a handler gets to see about the event it is handling.
///
/// Cloning is cheap; the envelope is shared.
#[derive(Clone)]
pub struct Context {
    event: Arc<EventEnvelope>,
    name: EventName,
    clients: Option<Arc<ClientFactory>>,
}

impl Context {
    pub fn new(event: Arc<EventEnvelope>, clients: Option<Arc<ClientFactory>>) -> Self {
        let name = event.qualified_name();
        Self {
            event,
            name,
            clients,
        }
    }

    pub fn event(&self) -> &EventEnvelope {
        &self.event
    }

    /// Delivery identifier.
    pub fn id(&self) -> &str {
        &self.event.id
    }

    /// Qualified event name (`issues.opened`).
    pub fn name(&self) -> &EventName {
        &self.name
    }

    pub fn payload(&self) -> &WebhookPayload {
        &self.event.payload
    }

    pub fn installation_id(&self) -> Option<InstallationId> {
        self.event.installation_id()
    }

    /// `(owner, repo)` of the repository the event refers to.
    pub fn repo(&self) -> Option<(&str, &str)> {
        let repository = self.event.payload.repository.as_ref()?;
        let owner = repository.owner.as_ref().map(|o| o.login.as_str());
        match (owner, repository.full_name.as_deref()) {
            (Some(owner), _) if !owner.is_empty() => Some((owner, repository.name.as_str())),
            (_, Some(full_name)) => full_name.split_once('/'),
            _ => None,
        }
    }

    /// API client for this event.
    ///
    /// Authenticated as the event's installation when the payload names one,
    /// otherwise as the app.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredentials`] when the dispatcher was built
    /// without a client factory.
    pub fn client(&self) -> Result<GitHubClient, AuthError> {
        let clients = self
            .clients
            .as_ref()
            .ok_or_else(|| AuthError::MissingCredentials {
                message: "no API client factory is configured".to_string(),
            })?;

        match self.installation_id() {
            Some(installation_id) => clients.installation_client(installation_id),
            None => clients.app_client(),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.event.id)
            .field("name", &self.name.to_string())
            .finish()
    }
}

/// Application logic run for matching events.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use octoflow::error::BoxError;
/// use octoflow::webhook::{Context, EventHandler};
///
/// struct Greeter;
///
/// #[async_trait]
/// impl EventHandler for Greeter {
///     async fn handle(&self, context: &Context) -> Result<(), BoxError> {
///         if let Some((owner, repo)) = context.repo() {
///             println!("{} in {}/{}", context.name(), owner, repo);
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, context: &Context) -> Result<(), BoxError>;
}

/// [`EventHandler`] backed by an async closure. Built with [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as an [`EventHandler`].
///
/// ```rust
/// use octoflow::webhook::{handler_fn, Context};
///
/// let handler = handler_fn(|context: Context| async move {
///     println!("received {}", context.name());
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn handle(&self, context: &Context) -> Result<(), BoxError> {
        (self.f)(context.clone()).await
    }
}

/// Observer for deliveries rejected before any handler ran.
pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, error: &DispatchError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&DispatchError) + Send + Sync,
{
    fn handle_error(&self, error: &DispatchError) {
        self(error)
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
