//! Common test utilities for octoflow integration tests
//!
//! This module provides:
//! - App configuration pointed at a mock GitHub API
//! - Signed webhook delivery builders
//! - Mock responses for the installation token and app metadata endpoints

use chrono::{Duration, Utc};
use octoflow::{AppConfig, SignatureVerifier, WebhookDelivery};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_APP_ID: u64 = 123456;
pub const TEST_WEBHOOK_SECRET: &str = "integration-secret";
pub const TEST_PRIVATE_KEY_PEM: &str = include_str!("../../test-data/app-private-key.pem");

/// App configuration with app credentials, a webhook secret and the API
/// rooted at `server`.
///
/// The subscription check is disabled; tests that need it turn it back on.
#[allow(dead_code)]
pub fn app_config(server: &MockServer) -> AppConfig {
    AppConfig {
        app_id: Some(TEST_APP_ID),
        private_key: Some(TEST_PRIVATE_KEY_PEM.to_string()),
        webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
        base_url: Some(server.uri()),
        disable_webhook_event_check: true,
        ..AppConfig::default()
    }
}

/// A delivery signed with [`TEST_WEBHOOK_SECRET`].
#[allow(dead_code)]
pub fn signed_delivery(id: &str, event: &str, payload: &Value) -> WebhookDelivery {
    let body = serde_json::to_vec(payload).unwrap();
    let signature = SignatureVerifier::new(TEST_WEBHOOK_SECRET).sign(&body);
    WebhookDelivery::new(id, event, Some(signature), body)
}

/// An `issues.opened` payload for `octo-org/hello-world` under installation `installation_id`.
#[allow(dead_code)]
pub fn issue_opened_payload(installation_id: u64) -> Value {
    json!({
        "action": "opened",
        "issue": { "number": 1, "title": "Found a bug" },
        "repository": {
            "id": 1296269,
            "name": "hello-world",
            "full_name": "octo-org/hello-world",
            "owner": { "login": "octo-org", "id": 1 }
        },
        "installation": { "id": installation_id }
    })
}

/// Token exchange response expiring in one hour.
#[allow(dead_code)]
pub fn access_token_response(token: &str) -> ResponseTemplate {
    access_token_response_expiring(token, Duration::hours(1))
}

#[allow(dead_code)]
pub fn access_token_response_expiring(token: &str, expires_in: Duration) -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(json!({
        "token": token,
        "expires_at": (Utc::now() + expires_in).to_rfc3339(),
    }))
}

/// Mount a token exchange endpoint for `installation_id`.
#[allow(dead_code)]
pub async fn mount_token_exchange(server: &MockServer, installation_id: u64, token: &str) {
    Mock::given(method("POST"))
        .and(path(format!(
            "/app/installations/{}/access_tokens",
            installation_id
        )))
        .respond_with(access_token_response(token))
        .mount(server)
        .await;
}

/// Mount `GET /app` listing `events`.
#[allow(dead_code)]
pub async fn mount_app_metadata(server: &MockServer, events: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": TEST_APP_ID,
            "slug": "octoflow-test",
            "name": "Octoflow Test",
            "events": events,
            "permissions": { "issues": "write" }
        })))
        .mount(server)
        .await;
}

/// Number of requests the server received for `request_path`.
#[allow(dead_code)]
pub async fn request_count(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == request_path)
        .count()
}
