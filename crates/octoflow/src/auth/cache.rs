//! Installation token cache with single-flight refresh.
//!
//! Tokens are kept in a bounded LRU store keyed by installation id. A lookup
//! that finds a fresh token returns without suspending. Otherwise the first
//! caller starts a token exchange and registers it as the in-flight exchange
//! for that installation; every concurrent caller for the same installation
//! awaits that same exchange instead of starting another one.
//!
//! The in-flight marker is removed when the exchange settles, whether it
//! succeeded or not, so a failed exchange is retried by the next caller. A
//! failed exchange never writes to the token store.

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{InstallationId, InstallationToken, TokenExchanger};
use crate::error::AuthError;

type SharedExchange = Shared<BoxFuture<'static, Result<InstallationToken, AuthError>>>;

/// Sizing and freshness settings for [`InstallationTokenCache`].
#[derive(Debug, Clone)]
pub struct TokenCacheOptions {
    /// Maximum number of installations whose tokens are kept.
    pub capacity: u64,

    /// Upper bound on how long a token stays in the store, regardless of its
    /// reported expiry.
    pub max_age: std::time::Duration,

    /// Tokens expiring within this window are treated as expired.
    pub refresh_margin: Duration,
}

impl Default for TokenCacheOptions {
    fn default() -> Self {
        Self {
            capacity: 15_000,
            max_age: std::time::Duration::from_secs(59 * 60),
            refresh_margin: Duration::minutes(1),
        }
    }
}

/// Process-wide cache of installation access tokens.
///
/// Cloning is cheap; clones share the same store and in-flight exchanges.
///
/// # Examples
///
/// ```rust,no_run
/// use octoflow::auth::{InstallationId, InstallationTokenCache, TokenExchanger};
/// use std::sync::Arc;
///
/// # async fn example(exchanger: Arc<dyn TokenExchanger>) -> Result<(), Box<dyn std::error::Error>> {
/// let cache = InstallationTokenCache::new(exchanger);
/// let token = cache.get_token(InstallationId::new(42)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InstallationTokenCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    exchanger: Arc<dyn TokenExchanger>,
    tokens: Cache<InstallationId, InstallationToken>,
    in_flight: Mutex<HashMap<InstallationId, SharedExchange>>,
    refresh_margin: Duration,
}

impl InstallationTokenCache {
    pub fn new(exchanger: Arc<dyn TokenExchanger>) -> Self {
        Self::with_options(exchanger, TokenCacheOptions::default())
    }

    pub fn with_options(exchanger: Arc<dyn TokenExchanger>, options: TokenCacheOptions) -> Self {
        let tokens = Cache::builder()
            .max_capacity(options.capacity)
            .time_to_live(options.max_age)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            inner: Arc::new(CacheInner {
                exchanger,
                tokens,
                in_flight: Mutex::new(HashMap::new()),
                refresh_margin: options.refresh_margin,
            }),
        }
    }

    /// Return a valid access token string for the installation.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] of the token exchange. Every caller that was
    /// waiting on the same exchange receives the same error.
    pub async fn get_token(&self, installation_id: InstallationId) -> Result<String, AuthError> {
        self.installation_token(installation_id)
            .await
            .map(|token| token.token().to_string())
    }

    /// Return a valid [`InstallationToken`] for the installation.
    pub async fn installation_token(
        &self,
        installation_id: InstallationId,
    ) -> Result<InstallationToken, AuthError> {
        if let Some(token) = self.inner.fresh(installation_id) {
            debug!(installation_id = %installation_id, "Installation token cache hit");
            return Ok(token);
        }

        let exchange = self.inner.join_or_start(installation_id);
        exchange.await
    }

    /// Number of installations with a stored token.
    pub fn cached_installations(&self) -> u64 {
        self.inner.tokens.run_pending_tasks();
        self.inner.tokens.entry_count()
    }

    /// Number of token exchanges currently in flight.
    pub fn in_flight_exchanges(&self) -> usize {
        self.inner.lock_in_flight().len()
    }
}

impl CacheInner {
    fn fresh(&self, installation_id: InstallationId) -> Option<InstallationToken> {
        self.tokens
            .get(&installation_id)
            .filter(|token| !token.expires_soon(self.refresh_margin))
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<InstallationId, SharedExchange>> {
        // The map holds no invariant a panicking holder could break halfway.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn join_or_start(self: &Arc<Self>, installation_id: InstallationId) -> SharedExchange {
        let mut in_flight = self.lock_in_flight();

        if let Some(existing) = in_flight.get(&installation_id) {
            debug!(installation_id = %installation_id, "Joining in-flight token exchange");
            return existing.clone();
        }

        // A concurrent exchange may have settled between the lock-free lookup
        // and acquiring the lock. Its token is stored before its marker is removed.
        if let Some(token) = self.fresh(installation_id) {
            return futures::future::ready(Ok(token)).boxed().shared();
        }

        info!(installation_id = %installation_id, "Exchanging installation token");

        let inner = Arc::clone(self);
        let exchange = async move {
            let result = inner.exchanger.exchange(installation_id).await;
            match &result {
                Ok(token) => {
                    inner.tokens.insert(installation_id, token.clone());
                }
                Err(e) => {
                    warn!(
                        installation_id = %installation_id,
                        error = %e,
                        "Installation token exchange failed"
                    );
                }
            }
            inner.lock_in_flight().remove(&installation_id);
            result
        }
        .boxed()
        .shared();

        in_flight.insert(installation_id, exchange.clone());
        exchange
    }
}

impl std::fmt::Debug for InstallationTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationTokenCache")
            .field("cached", &self.inner.tokens.entry_count())
            .field("refresh_margin", &self.inner.refresh_margin)
            .finish()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
