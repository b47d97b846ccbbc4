//! # octoflow
//!
//! Framework for GitHub App webhook handlers.
//!
//! This crate provides:
//! - Webhook signature verification and event parsing
//! - A handler registry that routes events by base name (`issues`), qualified
//!   name (`issues.opened`) or wildcard, isolating handler failures
//! - Installation token caching with single-flight refresh
//! - Authenticated API clients with layered options and rate-limit handling
//! - A startup check that warns when handlers listen to events the app is not
//!   subscribed to
//!
//! # Examples
//!
//! ## Handling events
//!
//! ```rust,no_run
//! use octoflow::webhook::{handler_fn, Context};
//! use octoflow::App;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = App::from_env()?;
//!
//! app.on(
//!     "pull_request.opened",
//!     Arc::new(handler_fn(|context: Context| async move {
//!         let pr = context.payload().get("pull_request");
//!         println!("new pull request: {:?}", pr.and_then(|p| p.get("title")));
//!         Ok(())
//!     })),
//! )?;
//!
//! app.simulate("pull_request", "fixtures/pull_request.opened.json".as_ref())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Installation tokens
//!
//! ```rust,no_run
//! use octoflow::auth::InstallationId;
//! use octoflow::App;
//!
//! # async fn example(app: &App) -> Result<(), Box<dyn std::error::Error>> {
//! // Concurrent callers for the same installation share one exchange.
//! let token = app.get_token(InstallationId::new(42)).await?;
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod subscription;
pub mod webhook;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at crate root for convenience
pub use app::App;
pub use config::AppConfig;
pub use error::{
    AggregateError, ApiError, AuthError, BoxError, ConfigError, DispatchError, HandlerError,
    PayloadError, SubscriptionUnknownError, ValidationError,
};

pub use auth::{AppId, InstallationId, InstallationToken, InstallationTokenCache, PrivateKey};
pub use client::{ClientFactory, ClientOptions, GitHubClient};
pub use subscription::{SubscriptionChecker, SubscriptionStatus};
pub use webhook::{
    handler_fn, Context, EventDispatcher, EventEnvelope, EventHandler, EventName, EventPattern,
    SignatureVerifier, WebhookDelivery,
};
