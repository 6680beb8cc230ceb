//! Router tests for the notification event endpoints.
//!
//! Drives the full middleware stack with `oneshot` requests against
//! in-memory storage and a scripted sender.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use herald_api::{create_router, AppState};
use herald_core::{
    storage::InMemoryEventStore, Clock, CoreError, DeliveryStatus, EventStore, NotificationEvent,
    TestClock,
};
use herald_delivery::{
    client::mock::{ScriptedResponse, ScriptedSender},
    DeliveryService, EventQueries, ReplayService, RetryPolicy,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const API_KEY: &str = "test-api-key-123";
const CLIENT: &str = "acme";

struct TestApp {
    store: Arc<InMemoryEventStore>,
    sender: ScriptedSender,
    state: AppState,
}

impl TestApp {
    fn new(response: ScriptedResponse) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let store = Arc::new(InMemoryEventStore::new());
        let sender = ScriptedSender::always(response, clock.clone());
        let service = DeliveryService::new(
            store.clone(),
            Arc::new(sender.clone()),
            RetryPolicy { jitter_factor: 0.0, ..RetryPolicy::default() },
            clock.clone(),
        );
        let state = AppState::new(
            EventQueries::new(store.clone()),
            ReplayService::new(service, Some("https://fallback.test/hooks".to_string())),
            clock,
        );
        Self { store, sender, state }
    }

    fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    async fn seed(&self, event: NotificationEvent) {
        self.store.save(event).await.expect("seed event");
    }
}

fn event(id: &str, client: &str, day: u32, status: DeliveryStatus) -> NotificationEvent {
    let date = Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap();
    let mut event = NotificationEvent::new(id, "invoice.paid", json!({ "day": day }), date)
        .with_client(client)
        .with_webhook_url("https://receiver.test/hooks");
    event.delivery_status = status;
    event
}

fn request(method: &str, uri: &str, client: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Client-Id", client)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    request("GET", uri, CLIENT)
}

fn post(uri: &str) -> Request<Body> {
    request("POST", uri, CLIENT)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("failed to make request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

#[tokio::test]
async fn health_reports_up() {
    let app = TestApp::new(ScriptedResponse::Status(200));

    let (status, body) = send(app.router(), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
    assert_eq!(body["services"]["api"]["status"], "UP");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = TestApp::new(ScriptedResponse::Status(200));

    let response = app.router().oneshot(get("/health")).await.unwrap();

    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn list_filters_and_orders_newest_first() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    app.seed(event("evt-1", "acme", 1, DeliveryStatus::Failed)).await;
    app.seed(event("evt-2", "acme", 3, DeliveryStatus::Failed)).await;
    app.seed(event("evt-3", "acme", 2, DeliveryStatus::Completed)).await;
    app.seed(event("evt-4", "globex", 4, DeliveryStatus::Failed)).await;

    let (status, body) =
        send(app.router(), get("/notification_events?clientId=acme&deliveryStatus=failed")).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<_> = body.as_array().unwrap().iter().map(|e| e["event_id"].clone()).collect();
    assert_eq!(ids, [json!("evt-2"), json!("evt-1")]);
}

#[tokio::test]
async fn list_applies_date_range() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    for day in 1..=5 {
        app.seed(event(&format!("evt-{day}"), "acme", day, DeliveryStatus::Pending)).await;
    }

    let (status, body) = send(
        app.router(),
        get("/notification_events?startDate=2024-05-02&endDate=2024-05-04T12:00:00Z"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn list_rejects_malformed_filters() {
    let app = TestApp::new(ScriptedResponse::Status(200));

    for uri in [
        "/notification_events?deliveryStatus=lost",
        "/notification_events?startDate=last-week",
        "/notification_events?clientId=acme%20corp",
    ] {
        let (status, body) = send(app.router(), get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn get_returns_event_or_404() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    app.seed(event("evt-1", "acme", 1, DeliveryStatus::Pending)).await;

    let (status, body) = send(app.router(), get("/notification_events/evt-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event_id"], "evt-1");
    assert_eq!(body["delivery_status"], "pending");

    let (status, body) = send(app.router(), get("/notification_events/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn replay_of_failed_event_redelivers() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    app.seed(event("evt-1", "acme", 1, DeliveryStatus::Failed)).await;

    let (status, body) = send(app.router(), post("/notification_events/evt-1/replay")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "event replayed");
    assert_eq!(body["event"]["delivery_status"], "completed");
    assert_eq!(app.sender.call_count().await, 1);
}

#[tokio::test]
async fn replay_of_non_failed_event_conflicts() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    let original = event("evt-1", "acme", 1, DeliveryStatus::Completed);
    app.seed(original.clone()).await;

    let (status, body) = send(app.router(), post("/notification_events/evt-1/replay")).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "invalid_state");
    assert_eq!(app.sender.call_count().await, 0);

    let stored = app.store.find_by_id(&original.event_id).await.unwrap().unwrap();
    assert_eq!(stored, original);
}

#[tokio::test]
async fn replay_of_unknown_event_is_404() {
    let app = TestApp::new(ScriptedResponse::Status(200));

    let (status, _) = send(app.router(), post("/notification_events/ghost/replay")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn storage_failures_are_generic_500s() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    app.store.inject_find_error(CoreError::Database("connection reset by peer".into())).await;

    let (status, body) = send(app.router(), get("/notification_events")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "persistence");
    assert_eq!(body["error"]["message"], "internal server error");
}

#[tokio::test]
async fn api_key_is_enforced_when_configured() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    let router = create_router(app.state.clone().with_api_key(API_KEY));

    let (status, _) = send(router.clone(), get("/notification_events")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/notification_events")
        .header("X-API-Key", "nope")
        .header("X-Client-Id", CLIENT)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router.clone(), wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let header = Request::builder()
        .uri("/notification_events")
        .header("X-API-Key", API_KEY)
        .header("X-Client-Id", CLIENT)
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(router.clone(), header).await.0, StatusCode::OK);

    let bearer = Request::builder()
        .uri("/notification_events")
        .header("Authorization", format!("Bearer {API_KEY}"))
        .header("X-Client-Id", CLIENT)
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(router.clone(), bearer).await.0, StatusCode::OK);

    let (status, _) = send(router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn event_routes_require_client_id() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    app.seed(event("evt-1", "acme", 1, DeliveryStatus::Failed)).await;

    let anonymous = Request::builder().uri("/notification_events").body(Body::empty()).unwrap();
    let (status, body) = send(app.router(), anonymous).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let malformed = request("POST", "/notification_events/evt-1/replay", "acme corp");
    let (status, _) = send(app.router(), malformed).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.sender.call_count().await, 0);
}

#[tokio::test]
async fn list_is_scoped_to_caller() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    app.seed(event("evt-1", "acme", 1, DeliveryStatus::Failed)).await;
    app.seed(event("evt-2", "globex", 2, DeliveryStatus::Failed)).await;

    let (status, body) = send(app.router(), get("/notification_events")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<_> = body.as_array().unwrap().iter().map(|e| e["event_id"].clone()).collect();
    assert_eq!(ids, [json!("evt-1")]);

    let (status, body) = send(app.router(), get("/notification_events?clientId=globex")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
}

#[tokio::test]
async fn other_clients_events_are_hidden() {
    let app = TestApp::new(ScriptedResponse::Status(200));
    let foreign = event("evt-9", "globex", 1, DeliveryStatus::Failed);
    app.seed(foreign.clone()).await;

    let (status, _) = send(app.router(), get("/notification_events/evt-9")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app.router(), post("/notification_events/evt-9/replay")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.sender.call_count().await, 0);

    let stored = app.store.find_by_id(&foreign.event_id).await.unwrap().unwrap();
    assert_eq!(stored, foreign);

    let (status, body) =
        send(app.router(), request("GET", "/notification_events/evt-9", "globex")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event_id"], "evt-9");
}
