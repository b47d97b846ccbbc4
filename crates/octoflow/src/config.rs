//! Application configuration.
//!
//! Configuration is layered with the `config` crate. Sources, lowest
//! precedence first:
//!
//! 1. `config/octoflow.{yaml,toml,json}` in the working directory (optional)
//! 2. An explicit file passed to [`AppConfig::load`]
//! 3. Environment variables prefixed `OCTOFLOW__`, with `__` separating
//!    nested keys (`OCTOFLOW__WEBHOOK_SECRET`, `OCTOFLOW__LOGGING__LEVEL`)
//!
//! Every field carries a serde default, so an empty environment produces a
//! valid (if credential-less) configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::auth::{AppId, PrivateKey, TokenCacheOptions};
use crate::client::options::{ClientOptions, ThrottleOptions, DEFAULT_BASE_URL};
use crate::error::{ConfigError, ValidationError};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "OCTOFLOW";

/// Installation tokens are valid for one hour, so caching longer is pointless.
pub const MAX_TOKEN_AGE_SECONDS: u64 = 3600;

/// Configuration for an octoflow [`App`](crate::App).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// GitHub App id.
    pub app_id: Option<u64>,

    /// PEM-encoded private key. Literal `\n` sequences are expanded.
    pub private_key: Option<String>,

    /// File holding the private key; read when `private_key` is unset.
    pub private_key_path: Option<PathBuf>,

    /// Static token used for every request instead of app authentication.
    pub github_token: Option<String>,

    /// Secret shared with the platform for webhook signatures.
    pub webhook_secret: Option<String>,

    /// API root. Takes precedence over `ghe_host`.
    pub base_url: Option<String>,

    /// GitHub Enterprise Server host, used as `{ghe_protocol}://{ghe_host}/api/v3`.
    pub ghe_host: Option<String>,

    pub ghe_protocol: String,

    /// Deployment environment name; `production` disables the event
    /// subscription check.
    pub environment: String,

    pub disable_webhook_event_check: bool,

    pub user_agent: Option<String>,

    pub request_timeout_seconds: u64,

    pub token_cache: TokenCacheConfig,

    pub throttle: ThrottleConfig,

    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            private_key: None,
            private_key_path: None,
            github_token: None,
            webhook_secret: None,
            base_url: None,
            ghe_host: None,
            ghe_protocol: "https".to_string(),
            environment: "development".to_string(),
            disable_webhook_event_check: false,
            user_agent: None,
            request_timeout_seconds: 30,
            token_cache: TokenCacheConfig::default(),
            throttle: ThrottleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Installation token cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenCacheConfig {
    /// Maximum number of installations with a cached token.
    pub capacity: u64,

    /// Longest time a token is kept, regardless of its expiry.
    pub max_age_seconds: u64,

    /// Tokens expiring within this many seconds are refreshed.
    pub refresh_margin_seconds: i64,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 15_000,
            max_age_seconds: 59 * 60,
            refresh_margin_seconds: 60,
        }
    }
}

/// Retry behaviour for rate-limited and failed API requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 60_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and the environment.
    ///
    /// `explicit_path`, when given, must exist.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/octoflow").required(false));

        if let Some(path) = explicit_path {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(config)
    }

    /// Deserialize and validate an already-built [`config::Config`].
    pub fn from_config(config: config::Config) -> Result<Self, ConfigError> {
        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Check the configuration for values that can never work.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.webhook_secret.as_deref().is_some_and(str::is_empty) {
            return Err(ValidationError::InvalidFormat {
                field: "webhook_secret".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.github_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ValidationError::InvalidFormat {
                field: "github_token".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let has_key = self.private_key.is_some() || self.private_key_path.is_some();
        if self.app_id.is_some() && !has_key {
            return Err(ValidationError::Required {
                field: "private_key".to_string(),
            });
        }
        if has_key && self.app_id.is_none() {
            return Err(ValidationError::Required {
                field: "app_id".to_string(),
            });
        }

        let base_url = self.api_base_url();
        match url::Url::parse(&base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(ValidationError::InvalidFormat {
                    field: "base_url".to_string(),
                    message: format!("unsupported scheme '{}'", url.scheme()),
                })
            }
            Err(e) => {
                return Err(ValidationError::InvalidFormat {
                    field: "base_url".to_string(),
                    message: format!("'{}' is not a valid URL: {}", base_url, e),
                })
            }
        }

        if self.token_cache.capacity == 0 {
            return Err(ValidationError::InvalidFormat {
                field: "token_cache.capacity".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let max_age = self.token_cache.max_age_seconds;
        if !(1..=MAX_TOKEN_AGE_SECONDS).contains(&max_age) {
            return Err(ValidationError::InvalidFormat {
                field: "token_cache.max_age_seconds".to_string(),
                message: format!("must be between 1 and {}", MAX_TOKEN_AGE_SECONDS),
            });
        }

        // max_age is at most an hour here, so the cast cannot wrap.
        let margin = self.token_cache.refresh_margin_seconds;
        if !(0..=max_age as i64).contains(&margin) {
            return Err(ValidationError::InvalidFormat {
                field: "token_cache.refresh_margin_seconds".to_string(),
                message: format!("must be between 0 and max_age_seconds ({})", max_age),
            });
        }

        Ok(())
    }

    /// API root: `base_url`, else the Enterprise Server host, else the public API.
    pub fn api_base_url(&self) -> String {
        if let Some(base_url) = &self.base_url {
            return base_url.trim_end_matches('/').to_string();
        }
        match &self.ghe_host {
            Some(host) if !host.is_empty() => format!("{}://{}/api/v3", self.ghe_protocol, host),
            _ => DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Whether registered event names are checked against the app's subscriptions.
    pub fn webhook_event_check_enabled(&self) -> bool {
        !self.disable_webhook_event_check && !self.environment.eq_ignore_ascii_case("production")
    }

    pub fn app_id(&self) -> Option<AppId> {
        self.app_id.map(AppId::new)
    }

    /// The private key from `private_key`, or read from `private_key_path`.
    pub fn load_private_key(&self) -> Result<Option<PrivateKey>, ConfigError> {
        let pem = match (&self.private_key, &self.private_key_path) {
            (Some(pem), _) => pem.clone(),
            (None, Some(path)) => {
                std::fs::read_to_string(path).map_err(|e| ConfigError::PrivateKeyFile {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?
            }
            (None, None) => return Ok(None),
        };

        Ok(Some(PrivateKey::from_pem(&pem)?))
    }

    pub fn token_cache_options(&self) -> TokenCacheOptions {
        TokenCacheOptions {
            capacity: self.token_cache.capacity,
            max_age: Duration::from_secs(self.token_cache.max_age_seconds),
            refresh_margin: chrono::Duration::seconds(self.token_cache.refresh_margin_seconds),
        }
    }

    /// App-wide client defaults.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: Some(self.api_base_url()),
            user_agent: self.user_agent.clone(),
            timeout: Some(Duration::from_secs(self.request_timeout_seconds)),
            auth: crate::client::AuthOptions {
                installation_id: None,
                token: self.github_token.clone(),
            },
            throttle: ThrottleOptions {
                enabled: Some(self.throttle.enabled),
                max_retries: Some(self.throttle.max_retries),
                initial_delay: Some(Duration::from_millis(self.throttle.initial_delay_ms)),
                max_delay: Some(Duration::from_millis(self.throttle.max_delay_ms)),
                ..ThrottleOptions::default()
            },
        }
    }
}

// Security: Don't expose secrets in debug output
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "<REDACTED>");
        f.debug_struct("AppConfig")
            .field("app_id", &self.app_id)
            .field("private_key", &redacted(&self.private_key))
            .field("private_key_path", &self.private_key_path)
            .field("github_token", &redacted(&self.github_token))
            .field("webhook_secret", &redacted(&self.webhook_secret))
            .field("base_url", &self.api_base_url())
            .field("environment", &self.environment)
            .field("disable_webhook_event_check", &self.disable_webhook_event_check)
            .field("token_cache", &self.token_cache)
            .field("throttle", &self.throttle)
            .field("logging", &self.logging)
            .finish()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
