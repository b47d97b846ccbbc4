//! GitHub App authentication types and interfaces.
//!
//! This module provides:
//! - ID types ([`AppId`], [`InstallationId`])
//! - Token types ([`InstallationToken`], [`JsonWebToken`])
//! - Private key handling ([`PrivateKey`])
//! - The [`TokenExchanger`] seam used by the [`InstallationTokenCache`]

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{AuthError, ValidationError};

pub mod cache;
pub mod exchange;
pub mod jwt;

pub use cache::{InstallationTokenCache, TokenCacheOptions};
pub use exchange::HttpTokenExchanger;
pub use jwt::{AppJwtSigner, JsonWebToken};

// ============================================================================
// Core ID Types
// ============================================================================

/// GitHub App identifier.
///
/// # Examples
///
/// ```
/// use octoflow::auth::AppId;
///
/// let app_id: AppId = "123456".parse().unwrap();
/// assert_eq!(app_id.as_u64(), 123456);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(u64);

impl AppId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AppId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<u64>()
            .map_err(|_| ValidationError::InvalidFormat {
                field: "app_id".to_string(),
                message: "must be a positive integer".to_string(),
            })?;
        Ok(Self::new(id))
    }
}

/// Identifier of one activation of the app on an account.
///
/// Each installation has its own, independently expiring access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstallationId(u64);

impl InstallationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstallationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstallationId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<u64>()
            .map_err(|_| ValidationError::InvalidFormat {
                field: "installation_id".to_string(),
                message: "must be a positive integer".to_string(),
            })?;
        Ok(Self::new(id))
    }
}

// ============================================================================
// Installation Token
// ============================================================================

/// Installation access token with its expiry.
#[derive(Clone)]
pub struct InstallationToken {
    token: String,
    installation_id: InstallationId,
    expires_at: DateTime<Utc>,
}

impl InstallationToken {
    pub fn new(token: String, installation_id: InstallationId, expires_at: DateTime<Utc>) -> Self {
        Self {
            token,
            installation_id,
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn installation_id(&self) -> InstallationId {
        self.installation_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the token expires within `margin` from now.
    pub fn expires_soon(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

// Security: Redact token in debug output
impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("installation_id", &self.installation_id)
            .field("expires_at", &self.expires_at)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

// ============================================================================
// Private Key
// ============================================================================

/// PEM-encoded RSA private key of the GitHub App.
#[derive(Clone)]
pub struct PrivateKey {
    pem: String,
}

impl PrivateKey {
    /// Parse a PEM private key.
    ///
    /// Escaped newlines (`\n` as two characters) are expanded, so keys stored in
    /// single-line environment variables are accepted.
    pub fn from_pem(pem: &str) -> Result<Self, ValidationError> {
        let pem = pem.trim().replace("\\n", "\n");

        if pem.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "private_key".to_string(),
                message: "PEM string cannot be empty".to_string(),
            });
        }

        if !pem.contains("-----BEGIN") || !pem.contains("-----END") {
            return Err(ValidationError::InvalidFormat {
                field: "private_key".to_string(),
                message: "Invalid PEM format: missing BEGIN/END markers".to_string(),
            });
        }

        jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
            ValidationError::InvalidFormat {
                field: "private_key".to_string(),
                message: format!("Failed to parse RSA private key: {}", e),
            }
        })?;

        Ok(Self { pem })
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }
}

// Security: Don't expose key data in debug output
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("pem", &"<REDACTED>")
            .finish()
    }
}

// ============================================================================
// Token Exchange
// ============================================================================

/// Exchanges app credentials for an installation access token.
///
/// This is the network operation the [`InstallationTokenCache`] protects with
/// single-flight semantics. [`HttpTokenExchanger`] is the production
/// implementation.
#[async_trait::async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Create a fresh access token for the installation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the credentials are invalid, the installation
    /// is unknown or revoked, or the platform cannot be reached.
    async fn exchange(&self, installation_id: InstallationId)
        -> Result<InstallationToken, AuthError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
