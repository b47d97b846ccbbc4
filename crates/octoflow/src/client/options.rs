//! Layered client options.
//!
//! A [`ClientFactory`](super::ClientFactory) holds a set of default options
//! fixed when the app starts. Each client it builds may supply overrides. The
//! two layers are merged leaf by leaf: an override replaces a default only for
//! the fields it actually sets, and nested groups (`auth`, `throttle`) are
//! merged field by field rather than replaced wholesale.
//!
//! Precedence, highest first:
//! 1. Per-client overrides
//! 2. Factory defaults
//! 3. Built-in defaults ([`ClientOptions::resolve`])
//!
//! Within `auth`, an explicit token always wins over an installation id, no
//! matter which layer supplied either.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;

use super::retry::{RateLimitInfo, RetryPolicy};
use crate::auth::InstallationId;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("octoflow/", env!("CARGO_PKG_VERSION"));

/// A rate-limited request, passed to throttle hooks.
#[derive(Debug, Clone)]
pub struct RateLimitEvent {
    pub method: Method,
    pub url: String,
    /// Number of retries already made for this request.
    pub retry_count: u32,
    /// How long the client will wait before retrying.
    pub retry_after: Duration,
    pub rate_limit: Option<RateLimitInfo>,
}

/// Decides whether a rate-limited request is retried.
pub type RateLimitHook = Arc<dyn Fn(&RateLimitEvent) -> bool + Send + Sync>;

/// Credential selection for a client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthOptions {
    /// Authenticate as this installation through the token cache.
    pub installation_id: Option<InstallationId>,

    /// Authenticate with this token, bypassing the token cache.
    pub token: Option<String>,
}

impl AuthOptions {
    pub fn merge(&self, overrides: &AuthOptions) -> AuthOptions {
        AuthOptions {
            installation_id: overrides.installation_id.or(self.installation_id),
            token: overrides.token.clone().or_else(|| self.token.clone()),
        }
    }
}

/// Retry and rate-limit behaviour.
#[derive(Clone, Default)]
pub struct ThrottleOptions {
    pub enabled: Option<bool>,
    pub max_retries: Option<u32>,
    pub initial_delay: Option<Duration>,
    pub max_delay: Option<Duration>,

    /// Called when the primary rate limit is exhausted.
    pub on_rate_limit: Option<RateLimitHook>,

    /// Called when a secondary (abuse) rate limit is hit.
    pub on_secondary_rate_limit: Option<RateLimitHook>,
}

impl ThrottleOptions {
    pub fn merge(&self, overrides: &ThrottleOptions) -> ThrottleOptions {
        ThrottleOptions {
            enabled: overrides.enabled.or(self.enabled),
            max_retries: overrides.max_retries.or(self.max_retries),
            initial_delay: overrides.initial_delay.or(self.initial_delay),
            max_delay: overrides.max_delay.or(self.max_delay),
            on_rate_limit: overrides
                .on_rate_limit
                .clone()
                .or_else(|| self.on_rate_limit.clone()),
            on_secondary_rate_limit: overrides
                .on_secondary_rate_limit
                .clone()
                .or_else(|| self.on_secondary_rate_limit.clone()),
        }
    }
}

impl fmt::Debug for ThrottleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleOptions")
            .field("enabled", &self.enabled)
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("on_rate_limit", &self.on_rate_limit.is_some())
            .field("on_secondary_rate_limit", &self.on_secondary_rate_limit.is_some())
            .finish()
    }
}

/// One layer of client options. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Option<Duration>,
    pub auth: AuthOptions,
    pub throttle: ThrottleOptions,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_installation(mut self, installation_id: InstallationId) -> Self {
        self.auth.installation_id = Some(installation_id);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth.token = Some(token.into());
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleOptions) -> Self {
        self.throttle = throttle;
        self
    }

    /// Merge `overrides` on top of `self`; overrides win on every leaf they set.
    pub fn merge(&self, overrides: &ClientOptions) -> ClientOptions {
        ClientOptions {
            base_url: overrides.base_url.clone().or_else(|| self.base_url.clone()),
            user_agent: overrides
                .user_agent
                .clone()
                .or_else(|| self.user_agent.clone()),
            timeout: overrides.timeout.or(self.timeout),
            auth: self.auth.merge(&overrides.auth),
            throttle: self.throttle.merge(&overrides.throttle),
        }
    }

    /// Fill every unset leaf with its built-in default.
    pub fn resolve(&self) -> ResolvedOptions {
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: self.throttle.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.throttle.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.throttle.max_delay.unwrap_or(defaults.max_delay),
            ..defaults
        };

        ResolvedOptions {
            base_url: self
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(30)),
            throttle_enabled: self.throttle.enabled.unwrap_or(true),
            retry,
            on_rate_limit: self.throttle.on_rate_limit.clone(),
            on_secondary_rate_limit: self.throttle.on_secondary_rate_limit.clone(),
        }
    }
}

/// Fully-resolved, non-credential client settings.
#[derive(Clone)]
pub struct ResolvedOptions {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub throttle_enabled: bool,
    pub retry: RetryPolicy,
    pub on_rate_limit: Option<RateLimitHook>,
    pub on_secondary_rate_limit: Option<RateLimitHook>,
}

impl fmt::Debug for ResolvedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOptions")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("throttle_enabled", &self.throttle_enabled)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
