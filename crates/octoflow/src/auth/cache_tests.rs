//! Tests for the installation token cache.

use super::*;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Mock Token Exchanger
// ============================================================================

/// Scripted exchanger that counts calls and can delay each exchange.
struct MockExchanger {
    calls: AtomicUsize,
    delay: std::time::Duration,
    outcomes: Mutex<VecDeque<Result<Duration, AuthError>>>,
}

impl MockExchanger {
    /// Every exchange succeeds with a token valid for one hour.
    fn succeeding() -> Self {
        Self::scripted(vec![])
    }

    /// Exchanges follow `outcomes` in order (`Ok` holds the token lifetime),
    /// then succeed with one-hour tokens.
    fn scripted(outcomes: Vec<Result<Duration, AuthError>>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: std::time::Duration::from_millis(20),
            outcomes: Mutex::new(outcomes.into()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenExchanger for MockExchanger {
    async fn exchange(
        &self,
        installation_id: InstallationId,
    ) -> Result<InstallationToken, AuthError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Duration::hours(1)));

        outcome.map(|lifetime| {
            InstallationToken::new(
                format!("ghs_{}_{}", installation_id, call),
                installation_id,
                Utc::now() + lifetime,
            )
        })
    }
}

fn cache_with(exchanger: &Arc<MockExchanger>) -> InstallationTokenCache {
    InstallationTokenCache::new(exchanger.clone() as Arc<dyn TokenExchanger>)
}

// ============================================================================
// Single-flight
// ============================================================================

mod single_flight_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_requests_share_one_exchange() {
        let exchanger = Arc::new(MockExchanger::succeeding());
        let cache = cache_with(&exchanger);
        let id = InstallationId::new(1);

        let results =
            futures::future::join_all((0..10).map(|_| cache.get_token(id))).await;

        assert_eq!(exchanger.calls(), 1, "Only one exchange should run");
        let tokens: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
        assert!(tokens.iter().all(|t| t == &tokens[0]));
        assert_eq!(cache.in_flight_exchanges(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_from_spawned_tasks_share_one_exchange() {
        let exchanger = Arc::new(MockExchanger::succeeding());
        let cache = cache_with(&exchanger);
        let id = InstallationId::new(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token(id).await })
            })
            .collect();

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(exchanger.calls(), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test]
    async fn test_different_installations_exchange_independently() {
        let exchanger = Arc::new(MockExchanger::succeeding());
        let cache = cache_with(&exchanger);

        let (a, b) = tokio::join!(
            cache.get_token(InstallationId::new(1)),
            cache.get_token(InstallationId::new(2))
        );

        assert_eq!(exchanger.calls(), 2);
        assert_ne!(a.unwrap(), b.unwrap());
    }
}

// ============================================================================
// Expiry
// ============================================================================

mod expiry_tests {
    use super::*;

    #[tokio::test]
    async fn test_unexpired_token_is_served_without_exchange() {
        let exchanger = Arc::new(MockExchanger::succeeding());
        let cache = cache_with(&exchanger);
        let id = InstallationId::new(5);

        let first = cache.get_token(id).await.unwrap();
        let second = cache.get_token(id).await.unwrap();
        let third = cache.get_token(id).await.unwrap();

        assert_eq!(exchanger.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[tokio::test]
    async fn test_expired_token_triggers_exactly_one_refresh() {
        let exchanger = Arc::new(MockExchanger::scripted(vec![Ok(Duration::seconds(-1))]));
        let cache = cache_with(&exchanger);
        let id = InstallationId::new(5);

        let stale = cache.get_token(id).await.unwrap();
        let refreshed = cache.get_token(id).await.unwrap();
        let reused = cache.get_token(id).await.unwrap();

        assert_eq!(exchanger.calls(), 2, "Expired token should be refreshed once");
        assert_ne!(stale, refreshed);
        assert_eq!(refreshed, reused);
    }

    #[tokio::test]
    async fn test_concurrent_requests_for_expired_token_share_one_refresh() {
        let exchanger = Arc::new(MockExchanger::scripted(vec![Ok(Duration::seconds(-1))]));
        let cache = cache_with(&exchanger);
        let id = InstallationId::new(5);
        cache.get_token(id).await.unwrap();

        let results =
            futures::future::join_all((0..5).map(|_| cache.get_token(id))).await;

        assert_eq!(exchanger.calls(), 2);
        assert!(results.iter().all(|r| r.as_ref().unwrap().ends_with("_2")));
    }

    #[tokio::test]
    async fn test_token_inside_refresh_margin_is_refreshed() {
        let exchanger = Arc::new(MockExchanger::scripted(vec![Ok(Duration::seconds(30))]));
        let cache = cache_with(&exchanger);
        let id = InstallationId::new(9);

        cache.get_token(id).await.unwrap();
        cache.get_token(id).await.unwrap();

        assert_eq!(exchanger.calls(), 2, "Default margin is one minute");
    }

    #[tokio::test]
    async fn test_expired_token_is_replaced_by_one_exchange() {
        let exchanger = Arc::new(MockExchanger::scripted(vec![Ok(-Duration::minutes(5))]));
        let cache = cache_with(&exchanger);
        let id = InstallationId::new(3);

        let expired = cache.get_token(id).await.unwrap();
        let fresh = cache.get_token(id).await.unwrap();
        let cached = cache.get_token(id).await.unwrap();

        assert_eq!(exchanger.calls(), 2);
        assert_ne!(expired, fresh);
        assert_eq!(fresh, cached);
    }
}

// ============================================================================
// Failures
// ============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let id = InstallationId::new(7);
        let exchanger = Arc::new(MockExchanger::scripted(vec![Err(
            AuthError::InstallationNotFound {
                installation_id: id,
            },
        )]));
        let cache = cache_with(&exchanger);

        let results =
            futures::future::join_all((0..4).map(|_| cache.get_token(id))).await;

        assert_eq!(exchanger.calls(), 1);
        for result in results {
            assert_eq!(
                result.unwrap_err(),
                AuthError::InstallationNotFound {
                    installation_id: id
                }
            );
        }
    }

    #[tokio::test]
    async fn test_failure_leaves_no_entry_and_next_call_retries() {
        let id = InstallationId::new(7);
        let exchanger = Arc::new(MockExchanger::scripted(vec![Err(
            AuthError::NetworkError("connection reset".to_string()),
        )]));
        let cache = cache_with(&exchanger);

        assert!(cache.get_token(id).await.is_err());
        assert_eq!(cache.cached_installations(), 0);
        assert_eq!(cache.in_flight_exchanges(), 0);

        let token = cache.get_token(id).await.expect("Retry should succeed");

        assert_eq!(exchanger.calls(), 2);
        assert!(token.starts_with("ghs_7_"));
    }
}

// ============================================================================
// Capacity
// ============================================================================

mod capacity_tests {
    use super::*;

    #[tokio::test]
    async fn test_store_is_bounded_by_capacity() {
        let exchanger = Arc::new(MockExchanger::succeeding());
        let cache = InstallationTokenCache::with_options(
            exchanger.clone() as Arc<dyn TokenExchanger>,
            TokenCacheOptions {
                capacity: 2,
                ..TokenCacheOptions::default()
            },
        );

        for id in 1..=5 {
            cache.get_token(InstallationId::new(id)).await.unwrap();
        }

        assert!(cache.cached_installations() <= 2);
        assert_eq!(exchanger.calls(), 5);
    }

    #[tokio::test]
    async fn test_eviction_does_not_disturb_in_flight_exchange() {
        let exchanger = Arc::new(MockExchanger::succeeding());
        let cache = InstallationTokenCache::with_options(
            exchanger.clone() as Arc<dyn TokenExchanger>,
            TokenCacheOptions {
                capacity: 1,
                ..TokenCacheOptions::default()
            },
        );

        let slow = cache.get_token(InstallationId::new(1));
        let filler = async {
            for id in 2..=4 {
                cache.get_token(InstallationId::new(id)).await.unwrap();
            }
        };
        let (slow_result, _) = tokio::join!(slow, filler);

        assert!(slow_result.unwrap().starts_with("ghs_1_"));
    }
}
