//! Error types for octoflow operations.
//!
//! Errors are grouped by the stage of webhook processing that raises them:
//! delivery verification ([`AuthError`], [`PayloadError`]), handler execution
//! ([`HandlerError`], aggregated into [`AggregateError`]), and the outbound
//! platform API ([`ApiError`]). [`DispatchError`] is the single error surfaced to
//! the transport layer.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::InstallationId;

/// Boxed error type returned by application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Authentication failures, both inbound (webhook signatures) and outbound
/// (app credentials and installation token exchange).
///
/// `AuthError` is `Clone` because one failed token exchange is reported to every
/// caller that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The delivery carried no signature header.
    #[error("Missing webhook signature")]
    MissingSignature,

    /// The signature header could not be parsed.
    #[error("Invalid signature format: {message}")]
    InvalidSignatureFormat { message: String },

    /// The signature does not match the payload.
    #[error("Webhook signature does not match payload")]
    SignatureMismatch,

    /// No webhook secret is configured, so nothing can be verified.
    #[error("No webhook secret configured")]
    MissingSecret,

    /// App credentials were rejected by the platform (non-retryable).
    #[error("Invalid GitHub App credentials")]
    InvalidCredentials,

    /// The app is configured without the credentials an operation needs.
    #[error("Missing credentials: {message}")]
    MissingCredentials { message: String },

    /// Invalid private key format or data (non-retryable).
    #[error("Invalid private key: {message}")]
    InvalidPrivateKey { message: String },

    /// JWT generation failed (non-retryable).
    #[error("JWT generation failed: {message}")]
    JwtGenerationFailed { message: String },

    /// Installation not found, suspended, or revoked.
    #[error("Installation {installation_id} not found or access denied")]
    InstallationNotFound { installation_id: InstallationId },

    /// The platform answered the token exchange with an unexpected status.
    #[error("Token exchange for installation {installation_id} failed: {status} - {message}")]
    TokenExchangeFailed {
        installation_id: InstallationId,
        status: u16,
        message: String,
    },

    /// Network connectivity or transport error.
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl AuthError {
    /// Check if this error represents a transient condition that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TokenExchangeFailed { status, .. } => *status >= 500 || *status == 429,
            Self::NetworkError(_) => true,
            _ => false,
        }
    }

    /// Whether the error was raised while verifying an inbound delivery.
    pub fn is_signature_error(&self) -> bool {
        matches!(
            self,
            Self::MissingSignature
                | Self::InvalidSignatureFormat { .. }
                | Self::SignatureMismatch
                | Self::MissingSecret
        )
    }
}

/// Malformed webhook deliveries.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The body is not valid JSON or does not have the expected shape.
    #[error("Invalid webhook payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A required transport field (event name or delivery id) is missing.
    #[error("Required field missing: {field}")]
    MissingField { field: String },

    /// The payload could not be read from its source.
    #[error("Failed to read payload from {path}: {message}")]
    Unreadable { path: String, message: String },
}

/// An application handler failed while processing an event.
///
/// Carries the event context so the failure can be traced back to the
/// delivery that caused it.
#[derive(Debug, Error)]
#[error("Handler failed for event {event_name} (delivery {event_id}): {source}")]
pub struct HandlerError {
    pub event_id: String,
    pub event_name: String,
    pub repository: Option<String>,
    pub installation: Option<InstallationId>,
    #[source]
    pub source: BoxError,
}

/// Every handler failure from a single dispatch, in invocation order.
#[derive(Debug)]
pub struct AggregateError {
    pub event_id: String,
    pub event_name: String,
    pub errors: Vec<HandlerError>,
}

impl AggregateError {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerError> {
        self.errors.iter()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} handler(s) failed for event {} (delivery {})",
            self.errors.len(),
            self.event_name,
            self.event_id
        )?;
        for error in &self.errors {
            write!(f, "; {}", error.source)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Error surfaced by the dispatcher to the transport layer.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The delivery failed signature verification; no handler ran.
    #[error("Webhook authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// The delivery could not be parsed; no handler ran.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// At least one handler failed; all handlers were attempted.
    #[error(transparent)]
    Handlers(#[from] AggregateError),
}

impl DispatchError {
    /// Default HTTP status for this error.
    ///
    /// The transport shell owns the final mapping; this is the conventional one.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Authentication(_) => 403,
            Self::Payload(_) => 400,
            Self::Handlers(_) => 500,
        }
    }

    /// Whether the delivery was rejected before any handler ran.
    pub fn is_delivery_error(&self) -> bool {
        !matches!(self, Self::Handlers(_))
    }
}

/// The app metadata needed for the subscription check could not be retrieved.
///
/// Never surfaced to handlers or to `dispatch`; it only produces a log line.
#[derive(Debug, Clone, Error)]
#[error(
    "Unable to retrieve app information from GitHub for event subscription verification: {reason}"
)]
pub struct SubscriptionUnknownError {
    pub reason: String,
}

/// Errors during platform API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP error response from the API.
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    /// Rate limit exceeded. Operations should wait until reset time.
    #[error("Rate limit exceeded. Reset at: {reset_at}")]
    RateLimitExceeded { reset_at: DateTime<Utc> },

    /// Request timed out.
    #[error("Request timeout")]
    Timeout,

    /// The request could not be built.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The client could not obtain credentials for the request.
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// The requested resource was not found.
    #[error("Resource not found")]
    NotFound,

    /// Failed to parse a JSON response.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP client error (network, TLS, etc.).
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),
}

impl ApiError {
    /// Check if this error represents a transient condition that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            Self::RateLimitExceeded { .. } => true,
            Self::Timeout => true,
            Self::InvalidRequest { .. } => false,
            Self::Authentication(e) => e.is_transient(),
            Self::NotFound => false,
            Self::JsonError(_) => false,
            Self::HttpClientError(e) => !e.is_builder() && !e.is_decode(),
        }
    }
}

/// Input validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing.
    #[error("Required field missing: {field}")]
    Required { field: String },

    /// A field has an invalid format.
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationError),

    /// The private key file could not be read.
    #[error("Failed to read private key from {path}: {message}")]
    PrivateKeyFile { path: String, message: String },

    /// The configured app credentials cannot be used.
    #[error("Invalid app credentials: {0}")]
    Credentials(#[from] AuthError),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
