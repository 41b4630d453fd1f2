//! HTTP integration tests
//!
//! Health endpoints, principal extraction and the SSE endpoint, driven
//! through the full router.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum_test::TestServer;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use ticket_events_core::event::EventType;
use ticket_events_core::replay::StartPosition;
use ticket_events_runtime::{Hub, HubConfig, SessionConfig};
use ticket_events_testing::InMemoryEventLog;
use ticket_events_testing::fixtures::{event_at, id};
use ticket_events_web::{AppState, build_router};
use tokio::sync::watch;
use tokio::time::timeout;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    log: Arc<InMemoryEventLog>,
    hub: Hub,
    shutdown: watch::Sender<bool>,
    app: Router,
}

fn harness(session: SessionConfig) -> Harness {
    let log = Arc::new(InMemoryEventLog::new());
    let hub = Hub::new(HubConfig::default());
    hub.start().unwrap();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let state = AppState::new(log.clone(), hub.handle(), session, shutdown_rx);
    let app = build_router(state);
    Harness {
        log,
        hub,
        shutdown,
        app,
    }
}

fn fast_session() -> SessionConfig {
    SessionConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_heartbeat_interval(Duration::from_secs(60))
}

fn stream_request(role: &str, last_event_id: Option<String>) -> Request<Body> {
    let mut request = Request::get("/api/events/stream")
        .header("X-Principal-Id", "user-1")
        .header("X-Principal-Role", role);
    if let Some(last) = last_event_id {
        request = request.header("Last-Event-ID", last);
    }
    request.body(Body::empty()).unwrap()
}

/// Read the SSE body until `done` holds for everything received so far.
async fn read_stream_until(app: Router, request: Request<Body>, done: impl Fn(&str) -> bool) -> String {
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let mut body = response.into_body().into_data_stream();
    let mut received = String::new();
    timeout(WAIT, async {
        while !done(&received) {
            let chunk = body.next().await.expect("stream ended early").unwrap();
            received.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out, received so far:\n{received}"));
    received
}

fn id_line(n: u128) -> String {
    format!("id: {}", id(n))
}

/// The `id:` field of the first `resync` frame in `received`.
fn resync_id(received: &str) -> String {
    let frame = received
        .split("\n\n")
        .find(|frame| frame.lines().any(|line| line == "event: resync"))
        .expect("no resync frame");
    frame
        .lines()
        .find_map(|line| line.strip_prefix("id:"))
        .expect("resync frame has no id")
        .trim()
        .to_string()
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn health_reports_ok() {
    let h = harness(fast_session());
    let server = TestServer::new(h.app).unwrap();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn readiness_ok_when_hub_and_log_are_up() {
    let h = harness(fast_session());
    let server = TestServer::new(h.app).unwrap();

    let response = server.get("/health/ready").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn readiness_fails_when_log_is_unreachable() {
    let h = harness(fast_session());
    h.log.fail_reads(true);
    let server = TestServer::new(h.app).unwrap();

    let response = server.get("/health/ready").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["ready"], false);
    assert_eq!(body["hub"], true);
    assert_eq!(body["event_log"], false);
}

#[tokio::test]
async fn readiness_fails_when_hub_is_stopped() {
    let h = harness(fast_session());
    h.hub.stop().await.unwrap();
    let server = TestServer::new(h.app).unwrap();

    let response = server.get("/health/ready").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["hub"], false);
}

// ============================================================================
// Principal extraction
// ============================================================================

#[tokio::test]
async fn stream_without_principal_is_unauthorized() {
    let h = harness(fast_session());
    let server = TestServer::new(h.app).unwrap();

    let response = server.get("/api/events/stream").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert!(body["code"].is_string());
}

#[tokio::test]
async fn stream_with_unknown_role_is_unauthorized() {
    let h = harness(fast_session());
    let server = TestServer::new(h.app).unwrap();

    let response = server
        .get("/api/events/stream")
        .add_header(
            axum::http::HeaderName::from_static("x-principal-id"),
            axum::http::HeaderValue::from_static("user-1"),
        )
        .add_header(
            axum::http::HeaderName::from_static("x-principal-role"),
            axum::http::HeaderValue::from_static("superuser"),
        )
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let h = harness(fast_session());
    let server = TestServer::new(h.app).unwrap();

    let response = server
        .get("/health")
        .add_header(
            axum::http::HeaderName::from_static("x-correlation-id"),
            axum::http::HeaderValue::from_static("6f1c1f8e-6a43-4c1e-9d59-2f8e5a3c7b10"),
        )
        .await;

    assert_eq!(
        response.header("x-correlation-id"),
        "6f1c1f8e-6a43-4c1e-9d59-2f8e5a3c7b10"
    );
}

// ============================================================================
// SSE
// ============================================================================

#[tokio::test]
async fn resume_replays_only_events_after_last_event_id() {
    let h = harness(fast_session());
    for n in 1..=3 {
        h.log.insert(event_at(100 + i64::try_from(n).unwrap(), n, EventType::CommentAdded));
    }

    let received = read_stream_until(
        h.app.clone(),
        stream_request("customer", Some(id(1).to_string())),
        |text| text.contains(&id_line(3)),
    )
    .await;

    assert!(!received.contains(&id_line(1)));
    let second = received.find(&id_line(2)).expect("event 2 replayed");
    let third = received.find(&id_line(3)).expect("event 3 replayed");
    assert!(second < third);
    assert!(received.contains("event: ticket"));
    assert!(received.contains(r#""type":"comment_added""#));
    assert!(received.contains(r#""payload":{"seq":2}"#));

    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn resume_id_in_query_parameter_is_honoured() {
    let h = harness(fast_session());
    h.log.insert(event_at(101, 1, EventType::CommentAdded));
    h.log.insert(event_at(102, 2, EventType::CommentAdded));

    let request = Request::get(format!("/api/events/stream?last_event_id={}", id(1)))
        .header("X-Principal-Id", "user-1")
        .header("X-Principal-Role", "agent")
        .body(Body::empty())
        .unwrap();
    let received = read_stream_until(h.app.clone(), request, |text| text.contains(&id_line(2))).await;

    assert!(!received.contains(&id_line(1)));
    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn events_appended_after_connect_are_streamed() {
    let h = harness(fast_session());
    h.log.insert(event_at(101, 1, EventType::TicketCreated));

    let app = h.app.clone();
    let reader = tokio::spawn(async move {
        read_stream_until(app, stream_request("agent", Some(id(1).to_string())), |text| {
            text.contains(&id_line(2))
        })
        .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.log.insert(event_at(102, 2, EventType::StatusChanged));

    let received = reader.await.unwrap();
    assert!(received.contains(r#""type":"status_changed""#));
    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn customer_stream_skips_restricted_events() {
    let h = harness(fast_session().with_start_position(StartPosition::Beginning));
    h.log.insert(event_at(101, 1, EventType::InternalNoteAdded));
    h.log.insert(event_at(102, 2, EventType::SlaBreached));
    h.log.insert(event_at(103, 3, EventType::CommentAdded));

    let received = read_stream_until(h.app.clone(), stream_request("customer", None), |text| {
        text.contains(&id_line(3))
    })
    .await;

    assert!(!received.contains(&id_line(1)));
    assert!(!received.contains(&id_line(2)));
    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn agent_stream_includes_restricted_events() {
    let h = harness(fast_session().with_start_position(StartPosition::Beginning));
    h.log.insert(event_at(101, 1, EventType::InternalNoteAdded));
    h.log.insert(event_at(102, 2, EventType::CommentAdded));

    let received = read_stream_until(h.app.clone(), stream_request("agent", None), |text| {
        text.contains(&id_line(2))
    })
    .await;

    assert!(received.contains(&id_line(1)));
    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn unknown_resume_id_asks_client_to_resync() {
    let h = harness(fast_session());
    h.log.insert(event_at(101, 1, EventType::CommentAdded));

    let received = read_stream_until(
        h.app.clone(),
        stream_request("customer", Some(id(999).to_string())),
        |text| text.contains("event: resync"),
    )
    .await;

    // Resync continues from the head, so nothing is replayed
    assert!(!received.contains("event: ticket"));
    assert_eq!(resync_id(&received), id(1).to_string());
    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn reconnecting_with_the_resync_id_does_not_resync_again() {
    let h = harness(fast_session());
    h.log.insert(event_at(101, 1, EventType::CommentAdded));

    let first = read_stream_until(
        h.app.clone(),
        stream_request("customer", Some(id(999).to_string())),
        |text| text.contains("event: resync"),
    )
    .await;
    let resume = resync_id(&first);

    h.log.insert(event_at(102, 2, EventType::CommentAdded));
    let second = read_stream_until(h.app.clone(), stream_request("customer", Some(resume)), |text| {
        text.contains(&id_line(2))
    })
    .await;

    assert!(!second.contains("event: resync"));
    assert!(!second.contains(&id_line(1)));
    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn resync_on_empty_log_clears_the_client_id() {
    let h = harness(fast_session());

    let received = read_stream_until(
        h.app.clone(),
        stream_request("customer", Some(id(999).to_string())),
        |text| text.contains("event: resync"),
    )
    .await;

    assert_eq!(resync_id(&received), "");
    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn stream_ends_on_shutdown() {
    let h = harness(fast_session());

    let response = h.app.clone().oneshot(stream_request("agent", None)).await.unwrap();
    let mut body = response.into_body().into_data_stream();

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.shutdown.send(true).unwrap();

    let ended = timeout(WAIT, async {
        while let Some(chunk) = body.next().await {
            chunk.unwrap();
        }
    })
    .await;
    assert!(ended.is_ok(), "stream did not end after shutdown");
}
