//! The assembled application.
//!
//! [`App`] wires the framework's components together from an [`AppConfig`].
//! The transport shell only needs to hand raw deliveries to
//! [`App::receive`] and map the result to a response.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::{AppJwtSigner, HttpTokenExchanger, InstallationId, InstallationTokenCache};
use crate::client::{ClientFactory, GitHubClient};
use crate::config::AppConfig;
use crate::error::{AuthError, ConfigError, DispatchError, PayloadError, ValidationError};
use crate::subscription::{AppMetadataSource, SubscriptionChecker};
use crate::webhook::{
    ErrorHandler, EventDispatcher, EventEnvelope, EventHandler, IntoEventPatterns,
    SignatureVerifier, WebhookDelivery,
};

/// A GitHub App: handler registry plus everything needed to authenticate.
///
/// # Examples
///
/// ```rust,no_run
/// use octoflow::config::AppConfig;
/// use octoflow::webhook::{handler_fn, Context, WebhookDelivery};
/// use octoflow::App;
/// use std::sync::Arc;
///
/// # async fn example(headers: Vec<(&str, &str)>, body: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
/// let app = App::from_config(&AppConfig::load(None)?)?;
///
/// app.on(
///     ["issues.opened", "issues.reopened"],
///     Arc::new(handler_fn(|context: Context| async move {
///         let client = context.client()?;
///         if let Some((owner, repo)) = context.repo() {
///             client
///                 .post(
///                     &format!("/repos/{}/{}/issues/1/comments", owner, repo),
///                     &serde_json::json!({ "body": "Thanks for opening this issue!" }),
///                 )
///                 .await?;
///         }
///         Ok(())
///     })),
/// )?;
///
/// let delivery = WebhookDelivery::from_headers(headers, body);
/// if let Err(e) = app.receive(&delivery).await {
///     eprintln!("delivery failed with status {}: {}", e.status_code(), e);
/// }
/// # Ok(())
/// # }
/// ```
pub struct App {
    dispatcher: EventDispatcher,
    clients: Arc<ClientFactory>,
    subscriptions: Arc<SubscriptionChecker>,
}

impl App {
    /// Assemble an app from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid, the private
    /// key cannot be read or used, or the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let http_client = reqwest::Client::builder().build()?;
        let mut clients =
            ClientFactory::with_http_client(config.client_options(), http_client.clone());

        match (config.app_id(), config.load_private_key()?) {
            (Some(app_id), Some(private_key)) => {
                let signer = Arc::new(AppJwtSigner::new(app_id, &private_key)?);
                let exchanger =
                    HttpTokenExchanger::new(http_client, config.api_base_url(), Arc::clone(&signer));
                let cache = InstallationTokenCache::with_options(
                    Arc::new(exchanger),
                    config.token_cache_options(),
                );
                clients = clients.with_app_credentials(signer, cache);
                info!(app_id = %app_id, "Configured GitHub App authentication");
            }
            _ if config.github_token.is_some() => {
                info!("Configured static token authentication");
            }
            _ => {
                debug!("No API credentials configured");
            }
        }

        let clients = Arc::new(clients);
        let subscriptions = Arc::new(SubscriptionChecker::new(
            Arc::clone(&clients) as Arc<dyn AppMetadataSource>,
            config.webhook_event_check_enabled(),
        ));

        let mut dispatcher = EventDispatcher::new()
            .with_client_factory(Arc::clone(&clients))
            .with_subscription_checker(Arc::clone(&subscriptions));
        if let Some(secret) = &config.webhook_secret {
            dispatcher = dispatcher.with_verifier(SignatureVerifier::new(secret.as_str()));
        }

        Ok(Self {
            dispatcher,
            clients,
            subscriptions,
        })
    }

    /// Load configuration from the default sources and assemble an app.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(&AppConfig::load(None)?)
    }

    /// Register `handler` for one or more event patterns.
    pub fn on(
        &self,
        patterns: impl IntoEventPatterns,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), ValidationError> {
        self.dispatcher.on(patterns, handler)
    }

    /// Register `handler` for every event.
    pub fn on_any(&self, handler: Arc<dyn EventHandler>) {
        self.dispatcher.on_any(handler)
    }

    /// Register an observer for rejected deliveries.
    pub fn on_error(&self, handler: Arc<dyn ErrorHandler>) {
        self.dispatcher.on_error(handler)
    }

    /// Verify and dispatch a raw delivery.
    pub async fn receive(&self, delivery: &WebhookDelivery) -> Result<(), DispatchError> {
        self.dispatcher.receive(delivery).await
    }

    /// Dispatch an already-trusted event without signature verification.
    pub async fn receive_unsigned(&self, envelope: EventEnvelope) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(envelope).await
    }

    /// Dispatch the JSON payload in `payload_path` as event `event_name`.
    ///
    /// The delivery gets a fresh random id; no signature is required.
    pub async fn simulate(&self, event_name: &str, payload_path: &Path) -> Result<(), DispatchError> {
        let body = tokio::fs::read(payload_path)
            .await
            .map_err(|e| PayloadError::Unreadable {
                path: payload_path.display().to_string(),
                message: e.to_string(),
            })?;

        let id = uuid::Uuid::new_v4().to_string();
        info!(
            delivery_id = %id,
            event = event_name,
            path = %payload_path.display(),
            "Simulating webhook delivery"
        );

        let envelope = EventEnvelope::parse(&id, event_name, &body)?;
        self.dispatcher.dispatch(envelope).await
    }

    /// Client authenticated as `installation_id`, or as the app when `None`.
    pub fn auth(&self, installation_id: Option<InstallationId>) -> Result<GitHubClient, AuthError> {
        match installation_id {
            Some(id) => self.clients.installation_client(id),
            None => self.clients.app_client(),
        }
    }

    /// Access token for an installation.
    pub async fn get_token(&self, installation_id: InstallationId) -> Result<String, AuthError> {
        self.clients.get_token(installation_id).await
    }

    /// Forget the cached app metadata and subscription check results.
    pub fn reset_subscription_check(&self) {
        self.subscriptions.reset();
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn clients(&self) -> &Arc<ClientFactory> {
        &self.clients
    }

    pub fn subscription_checker(&self) -> &Arc<SubscriptionChecker> {
        &self.subscriptions
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("dispatcher", &self.dispatcher)
            .field("clients", &self.clients)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
