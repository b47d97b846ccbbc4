//! Tests for subscriber initialisation.

use super::*;

#[test]
fn test_invalid_level_falls_back_to_info() {
    let config = LoggingConfig {
        level: "octoflow=loudest".to_string(),
        json_format: false,
    };

    let filter = env_filter(&config);

    if std::env::var("RUST_LOG").is_err() {
        assert_eq!(filter.to_string(), "info");
    }
}

#[test]
fn test_configured_level_is_used() {
    let config = LoggingConfig {
        level: "octoflow=debug".to_string(),
        json_format: true,
    };

    let filter = env_filter(&config);

    if std::env::var("RUST_LOG").is_err() {
        assert_eq!(filter.to_string(), "octoflow=debug");
    }
}

#[test]
fn test_second_init_returns_error() {
    let config = LoggingConfig::default();

    let _ = init(&config);

    assert!(init(&config).is_err(), "A global subscriber is already set");
}
