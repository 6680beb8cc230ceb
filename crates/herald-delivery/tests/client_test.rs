//! Integration tests for the HTTP webhook sender.
//!
//! Runs the sender against a local mock server to check the request it
//! produces and how each kind of response is classified.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use herald_core::{Clock, NotificationEvent, TestClock};
use herald_delivery::{ClientConfig, HttpWebhookSender, WebhookSender};
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn sender(timeout: Duration) -> (Arc<TestClock>, HttpWebhookSender) {
    let clock = Arc::new(TestClock::new());
    let config = ClientConfig { timeout, ..ClientConfig::default() };
    let sender = HttpWebhookSender::new(config, clock.clone()).expect("client builds");
    (clock, sender)
}

fn event() -> NotificationEvent {
    NotificationEvent::new("evt-123", "invoice.paid", json!({ "amount": 1250 }), Utc::now())
        .with_client("acme")
}

#[tokio::test]
async fn posts_full_event_with_event_id_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .and(header("X-Event-Id", "evt-123"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(json!({
            "event_id": "evt-123",
            "event_type": "invoice.paid",
            "content": { "amount": 1250 },
            "client_id": "acme"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (clock, sender) = sender(Duration::from_secs(5));
    let result = sender.deliver(&event(), &format!("{}/hooks", server.uri())).await;

    assert!(result.success);
    assert_eq!(result.status_code, Some(200));
    assert!(result.error.is_none());
    assert_eq!(result.timestamp, clock.now());
}

#[tokio::test]
async fn accepts_any_2xx_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let (_clock, sender) = sender(Duration::from_secs(5));
    let result = sender.deliver(&event(), &server.uri()).await;

    assert!(result.success);
    assert_eq!(result.status_code, Some(202));
}

#[tokio::test]
async fn server_errors_are_failed_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let (_clock, sender) = sender(Duration::from_secs(5));
    let result = sender.deliver(&event(), &server.uri()).await;

    assert!(!result.success);
    assert_eq!(result.status_code, Some(503));
    assert_eq!(result.error.as_deref(), Some("server error: HTTP 503"));
}

#[tokio::test]
async fn client_errors_are_failed_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (_clock, sender) = sender(Duration::from_secs(5));
    let result = sender.deliver(&event(), &server.uri()).await;

    assert!(!result.success);
    assert_eq!(result.status_code, Some(404));
}

#[tokio::test]
async fn redirect_without_location_is_unexpected_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(300))
        .mount(&server)
        .await;

    let (_clock, sender) = sender(Duration::from_secs(5));
    let result = sender.deliver(&event(), &server.uri()).await;

    assert!(!result.success);
    assert_eq!(result.status_code, Some(300));
    assert_eq!(result.error.as_deref(), Some("unexpected status: HTTP 300"));
}

#[tokio::test]
async fn slow_receiver_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let (_clock, sender) = sender(Duration::from_millis(100));
    let result = sender.deliver(&event(), &server.uri()).await;

    assert!(!result.success);
    assert!(result.status_code.is_none());
    assert_eq!(result.error.as_deref(), Some("request timeout after 100ms"));
}

#[tokio::test]
async fn unreachable_receiver_is_network_failure() {
    let (_clock, sender) = sender(Duration::from_secs(2));
    // Port 9 (discard) is closed on test machines.
    let result = sender.deliver(&event(), "http://127.0.0.1:9/hooks").await;

    assert!(!result.success);
    assert!(result.status_code.is_none());
    assert!(result.error.unwrap().starts_with("network connection failed"));
}
