//! JWT generation for GitHub App authentication.
//!
//! App JWTs authenticate as the app itself. They are used to exchange for
//! installation tokens and to read the app's own metadata.
//!
//! - JWTs use the RS256 algorithm
//! - Maximum lifetime is 10 minutes from issuance
//! - `iat` is backdated to tolerate clock drift between us and the platform

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::debug;

use super::{AppId, PrivateKey};
use crate::error::AuthError;

/// Claims of an app JWT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signed app JWT.
#[derive(Clone)]
pub struct JsonWebToken {
    token: String,
    app_id: AppId,
    expires_at: DateTime<Utc>,
}

impl JsonWebToken {
    pub fn new(token: String, app_id: AppId, expires_at: DateTime<Utc>) -> Self {
        Self {
            token,
            app_id,
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn expires_soon(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

// Security: Don't expose token in debug output
impl std::fmt::Debug for JsonWebToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonWebToken")
            .field("app_id", &self.app_id)
            .field("expires_at", &self.expires_at)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// RS256 signer for app JWTs.
///
/// Reuses the last JWT until it is within one minute of expiry.
pub struct AppJwtSigner {
    app_id: AppId,
    encoding_key: EncodingKey,
    expiration: Duration,
    current: RwLock<Option<JsonWebToken>>,
}

impl AppJwtSigner {
    /// Clock drift allowance applied to `iat`.
    const CLOCK_DRIFT: i64 = 60;

    /// Create a signer with the platform's maximum JWT lifetime (10 minutes).
    pub fn new(app_id: AppId, private_key: &PrivateKey) -> Result<Self, AuthError> {
        Self::with_expiration(app_id, private_key, Duration::minutes(10))
    }

    /// Create a signer with a custom JWT lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::JwtGenerationFailed`] if `expiration` exceeds 10
    /// minutes, or [`AuthError::InvalidPrivateKey`] if the key cannot be used.
    pub fn with_expiration(
        app_id: AppId,
        private_key: &PrivateKey,
        expiration: Duration,
    ) -> Result<Self, AuthError> {
        if expiration > Duration::minutes(10) || expiration <= Duration::zero() {
            return Err(AuthError::JwtGenerationFailed {
                message: "JWT expiration must be between 0 and 10 minutes".to_string(),
            });
        }

        let encoding_key = EncodingKey::from_rsa_pem(private_key.pem().as_bytes()).map_err(|e| {
            AuthError::InvalidPrivateKey {
                message: format!("Failed to create encoding key: {}", e),
            }
        })?;

        Ok(Self {
            app_id,
            encoding_key,
            expiration,
            current: RwLock::new(None),
        })
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    /// Return a valid JWT, signing a new one when the current one is about to expire.
    pub fn token(&self) -> Result<JsonWebToken, AuthError> {
        if let Ok(current) = self.current.read() {
            if let Some(jwt) = current.as_ref() {
                if !jwt.expires_soon(Duration::minutes(1)) {
                    return Ok(jwt.clone());
                }
            }
        }

        let jwt = self.sign()?;
        if let Ok(mut current) = self.current.write() {
            *current = Some(jwt.clone());
        }
        Ok(jwt)
    }

    fn sign(&self) -> Result<JsonWebToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + self.expiration;
        let claims = JwtClaims {
            iss: self.app_id.to_string(),
            iat: now.timestamp() - Self::CLOCK_DRIFT,
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key).map_err(
            |e| AuthError::JwtGenerationFailed {
                message: format!("Failed to encode JWT: {}", e),
            },
        )?;

        debug!(app_id = %self.app_id, exp = claims.exp, "Generated app JWT");

        Ok(JsonWebToken::new(token, self.app_id, expires_at))
    }
}

impl std::fmt::Debug for AppJwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppJwtSigner")
            .field("app_id", &self.app_id)
            .field("expiration", &self.expiration)
            .field("encoding_key", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;
