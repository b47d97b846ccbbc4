//! Event subscription check.
//!
//! A handler registered for an event the GitHub App is not subscribed to
//! will never run. To surface that misconfiguration early, the first delivery
//! for each registered event name triggers a background check against the
//! app's metadata (`GET /app`), logging an error when the app is not
//! subscribed to the event's base name.
//!
//! The metadata is fetched at most once per checker: concurrent checks share
//! the same in-flight request, and its result (success or failure) is
//! reused by every later check until [`SubscriptionChecker::reset`]. If the
//! metadata cannot be retrieved, a single warning is logged and every check
//! reports [`SubscriptionStatus::Unknown`] without logging again.
//!
//! The check never affects delivery processing; it only produces log lines.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn, Instrument};

use crate::client::ClientFactory;
use crate::error::SubscriptionUnknownError;
use crate::webhook::EventName;

/// Base events that appear in the app metadata's `events` list.
///
/// Events outside this list (`installation`, `fork`, ...) are delivered
/// without being listed, so they are always treated as subscribed.
pub const KNOWN_BASE_EVENTS: &[&str] = &[
    "check_run",
    "check_suite",
    "deployment",
    "deployment_status",
    "deploy_key",
    "issues",
    "issue_comment",
    "label",
    "member",
    "membership",
    "milestone",
    "organization",
    "org_block",
    "page_build",
    "public",
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "repository",
    "star",
    "status",
    "team",
    "team_add",
    "watch",
];

/// Outcome of a subscription check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// The check is disabled.
    Skipped,

    /// The app is subscribed, or the event is not one the metadata lists.
    Subscribed,

    /// The app is not subscribed to the event's base name.
    NotSubscribed,

    /// The app metadata could not be retrieved.
    Unknown,
}

impl SubscriptionStatus {
    /// `Some(subscribed)` when the check produced a definite answer.
    pub fn is_subscribed(&self) -> Option<bool> {
        match self {
            Self::Subscribed => Some(true),
            Self::NotSubscribed => Some(false),
            Self::Skipped | Self::Unknown => None,
        }
    }
}

/// Source of the base event names the app is subscribed to.
#[async_trait]
pub trait AppMetadataSource: Send + Sync {
    async fn subscribed_events(&self) -> Result<Vec<String>, SubscriptionUnknownError>;
}

#[async_trait]
impl AppMetadataSource for ClientFactory {
    async fn subscribed_events(&self) -> Result<Vec<String>, SubscriptionUnknownError> {
        let unknown = |reason: String| SubscriptionUnknownError { reason };

        let client = self.app_client().map_err(|e| unknown(e.to_string()))?;
        let app = client
            .get_authenticated_app()
            .await
            .map_err(|e| unknown(e.to_string()))?;
        Ok(app.events)
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Vec<String>>, SubscriptionUnknownError>>>;

#[derive(Default)]
struct CheckState {
    app_events: Option<SharedFetch>,
    checked: HashSet<EventName>,
}

/// Checks registered event names against the app's subscriptions.
pub struct SubscriptionChecker {
    source: Arc<dyn AppMetadataSource>,
    enabled: bool,
    unreachable: AtomicBool,
    state: Mutex<CheckState>,
}

impl SubscriptionChecker {
    pub fn new(source: Arc<dyn AppMetadataSource>, enabled: bool) -> Self {
        Self {
            source,
            enabled,
            unreachable: AtomicBool::new(false),
            state: Mutex::new(CheckState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether fetching the app metadata has failed since the last reset.
    pub fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::SeqCst)
    }

    /// Check `name` once in the background.
    ///
    /// Returns `None` without doing anything when the check is disabled or
    /// `name` was already checked since the last reset.
    pub fn spawn_check(self: &Arc<Self>, name: &EventName) -> Option<JoinHandle<SubscriptionStatus>> {
        if !self.enabled {
            return None;
        }
        if !self.lock_state().checked.insert(name.clone()) {
            return None;
        }

        let checker = Arc::clone(self);
        let name = name.clone();
        Some(tokio::spawn(
            async move { checker.check(&name).await }.in_current_span(),
        ))
    }

    /// Check whether the app is subscribed to `name`'s base event.
    pub async fn check(&self, name: &EventName) -> SubscriptionStatus {
        if !self.enabled {
            return SubscriptionStatus::Skipped;
        }

        let base = name.base();
        if !KNOWN_BASE_EVENTS.contains(&base) {
            return SubscriptionStatus::Subscribed;
        }

        let events = match self.app_events().await {
            Ok(events) => events,
            Err(e) => {
                if !self.unreachable.swap(true, Ordering::SeqCst) {
                    warn!(error = %e, "Event subscription check unavailable");
                }
                return SubscriptionStatus::Unknown;
            }
        };

        if events.iter().any(|event| event == base) {
            debug!(event = %name, "App is subscribed to event");
            SubscriptionStatus::Subscribed
        } else {
            error!(
                "Your app is attempting to listen to \"{}\", but your GitHub App is not subscribed to the \"{}\" event.",
                name, base
            );
            SubscriptionStatus::NotSubscribed
        }
    }

    /// Forget the fetched metadata, the unreachable flag and the checked names.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.app_events = None;
        state.checked.clear();
        self.unreachable.store(false, Ordering::SeqCst);
    }

    fn app_events(&self) -> SharedFetch {
        let mut state = self.lock_state();
        if let Some(fetch) = &state.app_events {
            return fetch.clone();
        }

        debug!("Fetching app metadata for event subscription check");
        let source = Arc::clone(&self.source);
        let fetch = async move { source.subscribed_events().await.map(Arc::new) }
            .boxed()
            .shared();
        state.app_events = Some(fetch.clone());
        fetch
    }

    fn lock_state(&self) -> MutexGuard<'_, CheckState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SubscriptionChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionChecker")
            .field("enabled", &self.enabled)
            .field("unreachable", &self.is_unreachable())
            .finish()
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
