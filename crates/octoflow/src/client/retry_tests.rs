//! Tests for retry policy and rate limiting.

use super::*;

mod rate_limit_info {
    use super::*;

    #[test]
    fn test_from_headers_valid() {
        let info = RateLimitInfo::from_headers(Some("5000"), Some("4999"), Some("1700000000"))
            .expect("Valid headers should parse");

        assert_eq!(info.limit, 5000);
        assert_eq!(info.remaining, 4999);
        assert_eq!(info.reset_at.timestamp(), 1_700_000_000);
        assert!(!info.is_limited);
    }

    #[test]
    fn test_from_headers_missing() {
        assert!(RateLimitInfo::from_headers(None, Some("10"), Some("1700000000")).is_none());
        assert!(RateLimitInfo::from_headers(Some("10"), None, Some("1700000000")).is_none());
        assert!(RateLimitInfo::from_headers(Some("10"), Some("10"), None).is_none());
    }

    #[test]
    fn test_from_headers_invalid() {
        assert!(RateLimitInfo::from_headers(Some("many"), Some("1"), Some("1700000000")).is_none());
        assert!(RateLimitInfo::from_headers(Some("10"), Some("-1"), Some("1700000000")).is_none());
    }

    #[test]
    fn test_is_limited_when_nothing_remains() {
        let info = RateLimitInfo::from_headers(Some("60"), Some("0"), Some("1700000000")).unwrap();
        assert!(info.is_limited);
    }

    #[test]
    fn test_from_header_map() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", "60".parse().unwrap());
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1700000000".parse().unwrap());

        let info = RateLimitInfo::from_header_map(&headers).unwrap();
        assert_eq!(info.limit, 60);
        assert!(info.is_limited);
    }

    #[test]
    fn test_time_until_reset_future() {
        let reset = (Utc::now() + chrono::Duration::seconds(120)).timestamp().to_string();
        let info = RateLimitInfo::from_headers(Some("60"), Some("0"), Some(&reset)).unwrap();

        let wait = info.time_until_reset();
        assert!(wait > Duration::from_secs(100));
        assert!(wait <= Duration::from_secs(120));
    }

    #[test]
    fn test_time_until_reset_past() {
        let info = RateLimitInfo::from_headers(Some("60"), Some("0"), Some("1000")).unwrap();
        assert_eq!(info.time_until_reset(), Duration::from_secs(0));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert("retry-after", "30".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));
    }
}

mod retry_policy {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!(policy.use_jitter);
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let policy = RetryPolicy::default().without_jitter();

        assert_eq!(policy.calculate_delay(0), Duration::from_secs(0));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped_at_max() {
        let policy =
            RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5)).without_jitter();

        assert_eq!(policy.calculate_delay(8), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy::default();

        for _ in 0..50 {
            let delay = policy.calculate_delay(2);
            assert!(delay >= Duration::from_millis(150));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_clamp() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(2));

        assert_eq!(policy.clamp(Duration::from_secs(3600)), Duration::from_secs(2));
        assert_eq!(policy.clamp(Duration::from_secs(1)), Duration::from_secs(1));
    }
}
