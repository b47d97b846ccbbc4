//! Webhook signature verification.
//!
//! Provides HMAC signature validation for webhook deliveries using
//! constant-time comparison to prevent timing attacks. `X-Hub-Signature-256`
//! carries only `sha256=` values. Legacy `sha1=` values are accepted only from
//! `X-Hub-Signature`, and only when the SHA-256 header is absent.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::event::{EventEnvelope, WebhookDelivery};
use crate::error::{AuthError, DispatchError, PayloadError};

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Hash algorithm named by the signature prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha256,
    Sha1,
}

impl SignatureAlgorithm {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256=",
            Self::Sha1 => "sha1=",
        }
    }
}

/// Verifies webhook signatures with the shared webhook secret.
///
/// # Security
///
/// - Uses constant-time comparison to prevent timing attacks
/// - Never logs secrets or signature values
/// - Validates signature format before HMAC computation
///
/// # Examples
///
/// ```
/// use octoflow::webhook::SignatureVerifier;
///
/// let verifier = SignatureVerifier::new("It's a Secret to Everybody");
/// let payload = br#"{"zen":"Design for failure."}"#;
/// let signature = verifier.sign(payload);
///
/// assert!(verifier.verify(payload, Some(&signature)).is_ok());
/// assert!(verifier.verify(b"tampered", Some(&signature)).is_err());
/// ```
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a `sha256=<hex>` signature over the raw body bytes.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingSecret`] when the configured secret is empty
    /// - [`AuthError::MissingSignature`] when no signature was supplied
    /// - [`AuthError::InvalidSignatureFormat`] for any other prefix or bad hex
    /// - [`AuthError::SignatureMismatch`] when the signature does not match
    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), AuthError> {
        self.verify_with(SignatureAlgorithm::Sha256, payload, signature)
    }

    /// Verify a legacy `sha1=<hex>` signature from `X-Hub-Signature`.
    ///
    /// Fails the same way as [`verify`](Self::verify), with `sha1=` as the
    /// only accepted prefix.
    pub fn verify_legacy(&self, payload: &[u8], signature: Option<&str>) -> Result<(), AuthError> {
        self.verify_with(SignatureAlgorithm::Sha1, payload, signature)
    }

    fn verify_with(
        &self,
        algorithm: SignatureAlgorithm,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<(), AuthError> {
        if self.secret.is_empty() {
            return Err(AuthError::MissingSecret);
        }

        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSignature)?;

        let provided = Self::parse_signature(algorithm, signature)?;
        let expected = self.compute_hmac(algorithm, payload)?;

        if Self::constant_time_compare(&provided, &expected) {
            Ok(())
        } else {
            Err(AuthError::SignatureMismatch)
        }
    }

    /// Verify a raw delivery and parse it into an [`EventEnvelope`].
    ///
    /// Signature verification happens before the body is parsed, so an
    /// unauthenticated body is never interpreted. When the SHA-256 header is
    /// present it alone decides; the legacy header is never a fallback for a
    /// failed SHA-256 check.
    pub fn verify_delivery(
        &self,
        delivery: &WebhookDelivery,
    ) -> Result<EventEnvelope, DispatchError> {
        match (&delivery.signature, &delivery.legacy_signature) {
            (None, Some(legacy)) => {
                self.verify_legacy(&delivery.body, Some(legacy.as_str()))?
            }
            (signature, _) => self.verify(&delivery.body, signature.as_deref())?,
        }

        let name = delivery
            .name
            .as_deref()
            .ok_or_else(|| PayloadError::MissingField {
                field: "name".to_string(),
            })?;
        let id = delivery
            .id
            .as_deref()
            .ok_or_else(|| PayloadError::MissingField {
                field: "id".to_string(),
            })?;

        Ok(EventEnvelope::parse(id, name, &delivery.body)?)
    }

    /// Compute the `sha256=<hex>` signature header value for a payload.
    pub fn sign(&self, payload: &[u8]) -> String {
        self.sign_with(SignatureAlgorithm::Sha256, payload)
    }

    /// Compute the signature header value with a specific algorithm.
    pub fn sign_with(&self, algorithm: SignatureAlgorithm, payload: &[u8]) -> String {
        // HMAC accepts keys of any length, including empty ones.
        let digest = self.compute_hmac(algorithm, payload).unwrap_or_default();
        format!("{}{}", algorithm.prefix(), hex::encode(digest))
    }

    fn parse_signature(
        algorithm: SignatureAlgorithm,
        signature: &str,
    ) -> Result<Vec<u8>, AuthError> {
        let hex_signature = signature.strip_prefix(algorithm.prefix()).ok_or_else(|| {
            AuthError::InvalidSignatureFormat {
                message: format!(
                    "Signature must start with '{}', got: '{}'",
                    algorithm.prefix(),
                    signature.chars().take(7).collect::<String>()
                ),
            }
        })?;

        hex::decode(hex_signature).map_err(|e| AuthError::InvalidSignatureFormat {
            message: format!("Invalid hex encoding in signature: {}", e),
        })
    }

    fn compute_hmac(
        &self,
        algorithm: SignatureAlgorithm,
        payload: &[u8],
    ) -> Result<Vec<u8>, AuthError> {
        let key = self.secret.as_bytes();
        let invalid_key = |e: hmac::digest::InvalidLength| AuthError::InvalidSignatureFormat {
            message: format!("Failed to create HMAC instance: {}", e),
        };

        match algorithm {
            SignatureAlgorithm::Sha256 => {
                let mut mac = HmacSha256::new_from_slice(key).map_err(invalid_key)?;
                mac.update(payload);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            SignatureAlgorithm::Sha1 => {
                let mut mac = HmacSha1::new_from_slice(key).map_err(invalid_key)?;
                mac.update(payload);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
        // Length is not secret; only the contents are compared in constant time.
        if a.len() != b.len() {
            return false;
        }

        a.ct_eq(b).into()
    }
}

// Security: Don't expose secrets in debug output
impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod tests;
