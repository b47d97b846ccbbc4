//! Authenticated platform API clients.
//!
//! [`ClientFactory`] turns layered [`ClientOptions`] into [`GitHubClient`]s.
//! A client authenticates in one of three ways, chosen when it is built:
//!
//! - an explicit token, sent as-is and never exchanged or cached
//! - an installation, whose access token comes from the shared
//!   [`InstallationTokenCache`](crate::auth::InstallationTokenCache)
//! - the app itself, with a short-lived JWT
//!
//! Requests are retried on rate limits and server errors according to the
//! client's throttle options.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{AppJwtSigner, InstallationId, InstallationTokenCache};
use crate::error::{ApiError, AuthError};

pub mod app;
pub mod options;
pub mod retry;

pub use app::{App, AppOwner};
pub use options::{
    AuthOptions, ClientOptions, RateLimitEvent, RateLimitHook, ResolvedOptions, ThrottleOptions,
};
pub use retry::{RateLimitInfo, RetryPolicy};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";

// ============================================================================
// Credentials
// ============================================================================

/// How a client authenticates its requests.
#[derive(Clone)]
pub enum Credentials {
    /// A caller-supplied token, used verbatim.
    Token(String),

    /// An installation access token from the shared cache.
    Installation {
        installation_id: InstallationId,
        cache: InstallationTokenCache,
    },

    /// An app JWT.
    App(Arc<AppJwtSigner>),

    /// No authentication.
    Anonymous,
}

impl Credentials {
    /// `Authorization` header value for the next request, if any.
    async fn authorization(&self) -> Result<Option<String>, AuthError> {
        match self {
            Self::Token(token) => Ok(Some(format!("token {}", token))),
            Self::Installation {
                installation_id,
                cache,
            } => {
                let token = cache.get_token(*installation_id).await?;
                Ok(Some(format!("token {}", token)))
            }
            Self::App(signer) => Ok(Some(format!("Bearer {}", signer.token()?.token()))),
            Self::Anonymous => Ok(None),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Installation { .. } => "installation",
            Self::App(_) => "app",
            Self::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<REDACTED>)"),
            Self::Installation {
                installation_id, ..
            } => f
                .debug_struct("Installation")
                .field("installation_id", installation_id)
                .finish(),
            Self::App(signer) => f.debug_tuple("App").field(&signer.app_id()).finish(),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

// ============================================================================
// Client Factory
// ============================================================================

/// Builds authenticated clients from app-wide defaults plus per-client overrides.
///
/// # Examples
///
/// ```rust
/// use octoflow::client::{ClientFactory, ClientOptions};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let factory = ClientFactory::new(
///     ClientOptions::new().with_base_url("https://ghe.example.com/api/v3"),
/// )?;
///
/// let client = factory.client(&ClientOptions::new().with_token("ghp_example"))?;
/// assert_eq!(client.base_url(), "https://ghe.example.com/api/v3");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientFactory {
    defaults: ClientOptions,
    http_client: reqwest::Client,
    signer: Option<Arc<AppJwtSigner>>,
    token_cache: Option<InstallationTokenCache>,
}

impl ClientFactory {
    /// Create a factory without app credentials.
    ///
    /// Clients it builds can use an explicit token or no authentication.
    pub fn new(defaults: ClientOptions) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder().build()?;
        Ok(Self::with_http_client(defaults, http_client))
    }

    pub fn with_http_client(defaults: ClientOptions, http_client: reqwest::Client) -> Self {
        Self {
            defaults,
            http_client,
            signer: None,
            token_cache: None,
        }
    }

    /// Attach app credentials so app and installation clients can be built.
    pub fn with_app_credentials(
        mut self,
        signer: Arc<AppJwtSigner>,
        token_cache: InstallationTokenCache,
    ) -> Self {
        self.signer = Some(signer);
        self.token_cache = Some(token_cache);
        self
    }

    pub fn defaults(&self) -> &ClientOptions {
        &self.defaults
    }

    pub fn token_cache(&self) -> Option<&InstallationTokenCache> {
        self.token_cache.as_ref()
    }

    /// Build a client from the defaults merged with `overrides`.
    ///
    /// Credential precedence: explicit token, then installation, then app
    /// JWT, then anonymous.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredentials`] when an installation client is
    /// requested from a factory without app credentials.
    pub fn client(&self, overrides: &ClientOptions) -> Result<GitHubClient, AuthError> {
        let merged = self.defaults.merge(overrides);
        let credentials = self.credentials_for(&merged.auth)?;
        let options = merged.resolve();

        debug!(
            credentials = credentials.kind(),
            base_url = %options.base_url,
            "Built API client"
        );

        Ok(GitHubClient {
            http_client: self.http_client.clone(),
            options,
            credentials,
        })
    }

    /// Client authenticated as an installation.
    pub fn installation_client(
        &self,
        installation_id: InstallationId,
    ) -> Result<GitHubClient, AuthError> {
        self.client(&ClientOptions::new().with_installation(installation_id))
    }

    /// Client authenticated as the app itself (or with the explicit token,
    /// if one is configured).
    pub fn app_client(&self) -> Result<GitHubClient, AuthError> {
        self.client(&ClientOptions::new())
    }

    /// Access token for an installation, through the shared cache.
    ///
    /// With an explicit token configured, that token is returned unchanged and
    /// no exchange takes place.
    pub async fn get_token(&self, installation_id: InstallationId) -> Result<String, AuthError> {
        if let Some(token) = &self.defaults.auth.token {
            return Ok(token.clone());
        }
        self.require_cache()?.get_token(installation_id).await
    }

    fn credentials_for(&self, auth: &AuthOptions) -> Result<Credentials, AuthError> {
        if let Some(token) = &auth.token {
            return Ok(Credentials::Token(token.clone()));
        }

        if let Some(installation_id) = auth.installation_id {
            return Ok(Credentials::Installation {
                installation_id,
                cache: self.require_cache()?.clone(),
            });
        }

        Ok(match &self.signer {
            Some(signer) => Credentials::App(Arc::clone(signer)),
            None => Credentials::Anonymous,
        })
    }

    fn require_cache(&self) -> Result<&InstallationTokenCache, AuthError> {
        self.token_cache
            .as_ref()
            .ok_or_else(|| AuthError::MissingCredentials {
                message: "app id and private key are required for installation access"
                    .to_string(),
            })
    }
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("base_url", &self.defaults.base_url)
            .field("has_app_credentials", &self.signer.is_some())
            .field("has_token", &self.defaults.auth.token.is_some())
            .finish()
    }
}

// ============================================================================
// GitHub Client
// ============================================================================

/// Authenticated API client.
///
/// Cheap to clone; clones share the HTTP connection pool and token cache.
#[derive(Clone)]
pub struct GitHubClient {
    http_client: reqwest::Client,
    options: ResolvedOptions,
    credentials: Credentials,
}

/// Why a response is being retried.
enum RetryReason {
    RateLimit,
    SecondaryRateLimit,
    ServerError,
}

impl GitHubClient {
    pub fn base_url(&self) -> &str {
        &self.options.base_url
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Installation this client acts for, if any.
    pub fn installation_id(&self) -> Option<InstallationId> {
        match &self.credentials {
            Credentials::Installation {
                installation_id, ..
            } => Some(*installation_id),
            _ => None,
        }
    }

    /// Make an authenticated request and return the raw response.
    ///
    /// Rate-limited and 5xx responses are retried according to the throttle
    /// options. Once retries are exhausted (or declined by a hook) the last
    /// response is returned; the caller is responsible for checking its
    /// status.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` if credentials cannot be obtained or the request
    /// fails at the transport level.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url_for(path);
        let mut retry_count = 0;

        loop {
            let mut request = self
                .http_client
                .request(method.clone(), &url)
                .timeout(self.options.timeout)
                .headers(self.default_headers()?);

            if let Some(authorization) = self.credentials.authorization().await? {
                let value = HeaderValue::from_str(&authorization).map_err(|e| {
                    ApiError::InvalidRequest {
                        message: format!("Invalid authorization header: {}", e),
                    }
                })?;
                request = request.header(AUTHORIZATION, value);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout
                } else {
                    ApiError::HttpClientError(e)
                }
            })?;

            let Some(delay) = self.retry_delay(&method, &url, &response, retry_count) else {
                return Ok(response);
            };

            retry_count += 1;
            debug!(
                method = %method,
                url = %url,
                retry_count,
                delay_ms = delay.as_millis() as u64,
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, path, Some(&body)).await
    }

    pub async fn put<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PUT, path, Some(&body)).await
    }

    pub async fn patch<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PATCH, path, Some(&body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.request(Method::DELETE, path, None).await
    }

    /// GET a resource and deserialize it, mapping error statuses to [`ApiError`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.get(path).await?;
        let response = Self::error_for_status(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Metadata of the app these credentials belong to (`GET /app`).
    ///
    /// Requires app JWT authentication.
    pub async fn get_authenticated_app(&self) -> Result<App, ApiError> {
        self.get_json("app").await
    }

    async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }

        if let Some(info) = RateLimitInfo::from_header_map(response.headers()) {
            if info.is_limited
                && (status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS)
            {
                return Err(ApiError::RateLimitExceeded {
                    reset_at: info.reset_at,
                });
            }
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error body".to_string());
        Err(ApiError::HttpError {
            status: status.as_u16(),
            message,
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let normalized_path = path.strip_prefix('/').unwrap_or(path);
        format!("{}/{}", self.options.base_url, normalized_path)
    }

    fn default_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
        let user_agent =
            HeaderValue::from_str(&self.options.user_agent).map_err(|e| ApiError::InvalidRequest {
                message: format!("Invalid user agent: {}", e),
            })?;
        headers.insert(USER_AGENT, user_agent);
        Ok(headers)
    }

    fn classify(response: &reqwest::Response) -> Option<RetryReason> {
        let status = response.status();
        let headers = response.headers();
        let exhausted = RateLimitInfo::from_header_map(headers).is_some_and(|info| info.is_limited);

        if status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::FORBIDDEN && exhausted)
        {
            return Some(RetryReason::RateLimit);
        }
        if status == StatusCode::FORBIDDEN && retry::parse_retry_after(headers).is_some() {
            return Some(RetryReason::SecondaryRateLimit);
        }
        if status.is_server_error() {
            return Some(RetryReason::ServerError);
        }
        None
    }

    /// How long to wait before retrying, or `None` to return the response.
    fn retry_delay(
        &self,
        method: &Method,
        url: &str,
        response: &reqwest::Response,
        retry_count: u32,
    ) -> Option<Duration> {
        if !self.options.throttle_enabled {
            return None;
        }

        let reason = Self::classify(response)?;
        let policy = &self.options.retry;
        if retry_count >= policy.max_retries {
            warn!(
                url = %url,
                status = response.status().as_u16(),
                retry_count,
                "Retries exhausted"
            );
            return None;
        }

        let headers = response.headers();
        let rate_limit = RateLimitInfo::from_header_map(headers);
        let requested = retry::parse_retry_after(headers)
            .or_else(|| rate_limit.as_ref().map(RateLimitInfo::time_until_reset));

        let (delay, hook) = match reason {
            RetryReason::ServerError => return Some(policy.calculate_delay(retry_count + 1)),
            RetryReason::RateLimit => (
                policy.clamp(requested.unwrap_or_else(|| policy.calculate_delay(retry_count + 1))),
                self.options.on_rate_limit.as_ref(),
            ),
            RetryReason::SecondaryRateLimit => (
                policy.clamp(requested.unwrap_or_else(|| policy.calculate_delay(retry_count + 1))),
                self.options.on_secondary_rate_limit.as_ref(),
            ),
        };

        warn!(
            method = %method,
            url = %url,
            retry_after_ms = delay.as_millis() as u64,
            retry_count,
            "Request was rate limited"
        );

        let event = RateLimitEvent {
            method: method.clone(),
            url: url.to_string(),
            retry_count,
            retry_after: delay,
            rate_limit,
        };
        match hook {
            Some(hook) if !hook(&event) => None,
            _ => Some(delay),
        }
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("options", &self.options)
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
