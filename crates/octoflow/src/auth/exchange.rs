//! HTTP installation token exchange.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{AppJwtSigner, InstallationId, InstallationToken, TokenExchanger};
use crate::error::AuthError;

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges an app JWT for an installation token via
/// `POST /app/installations/{id}/access_tokens`.
#[derive(Clone)]
pub struct HttpTokenExchanger {
    http_client: reqwest::Client,
    base_url: String,
    signer: Arc<AppJwtSigner>,
}

impl HttpTokenExchanger {
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        signer: Arc<AppJwtSigner>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
            signer,
        }
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    #[instrument(skip(self), fields(app_id = %self.signer.app_id()))]
    async fn exchange(
        &self,
        installation_id: InstallationId,
    ) -> Result<InstallationToken, AuthError> {
        let jwt = self.signer.token()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.base_url,
            installation_id.as_u64()
        );

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt.token()))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            warn!(
                installation_id = %installation_id,
                status = status.as_u16(),
                "Installation token exchange rejected"
            );
            return Err(match status.as_u16() {
                401 => AuthError::InvalidCredentials,
                403 | 404 => AuthError::InstallationNotFound { installation_id },
                code => AuthError::TokenExchangeFailed {
                    installation_id,
                    status: code,
                    message,
                },
            });
        }

        let body = response
            .json::<AccessTokenResponse>()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed {
                installation_id,
                status: status.as_u16(),
                message: format!("Failed to parse access token response: {}", e),
            })?;

        debug!(
            installation_id = %installation_id,
            expires_at = %body.expires_at,
            "Exchanged installation token"
        );

        Ok(InstallationToken::new(
            body.token,
            installation_id,
            body.expires_at,
        ))
    }
}

impl std::fmt::Debug for HttpTokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenExchanger")
            .field("base_url", &self.base_url)
            .field("signer", &self.signer)
            .finish()
    }
}
