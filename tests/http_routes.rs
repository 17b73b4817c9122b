//! HTTP Route Tests
//!
//! Drives the full router in-process: authentication, status mapping and
//! the JSON shapes clients depend on.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use docsync::cli::{build_components, Components, Config};
use docsync::http_server::HttpServer;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const ALICE: &str = "alice-token";
const BOB: &str = "bob-token";

// =============================================================================
// Test Utilities
// =============================================================================

struct TestApp {
    components: Components,
    router: Router,
    alice: Uuid,
}

fn app() -> TestApp {
    let alice = Uuid::new_v4();
    let config = Config::from_json(
        &json!({
            "sync": { "waiter_timeout_ms": 50, "max_log_len": 3 },
            "identities": [
                { "token": ALICE, "user_id": alice, "shortname": "alice", "display_name": "Alice" },
                { "token": BOB, "user_id": Uuid::new_v4(), "shortname": "bob", "display_name": "Bob" }
            ]
        })
        .to_string(),
    )
    .unwrap();
    let components = build_components(config);
    let router = HttpServer::new(components.config.http.clone(), components.state.clone()).router();
    TestApp {
        components,
        router,
        alice,
    }
}

fn doc_path() -> String {
    format!("/docs/acme/{}", Uuid::new_v4())
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn set_text(text: &str) -> Value {
    json!({ "type": "set_text", "index": 0, "text": text })
}

async fn create(app: &TestApp, path: &str) {
    let body = json!({ "blocks": [
        { "entity_id": Uuid::new_v4(), "kind": "paragraph", "text": "hello" }
    ]});
    let (status, _) = send(&app.router, Method::POST, path, Some(ALICE), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn submit(app: &TestApp, path: &str, version: u64, text: &str) -> (StatusCode, Value) {
    let body = json!({ "version": version, "steps": [set_text(text)], "client_id": "tab-1" });
    send(&app.router, Method::POST, &format!("{}/steps", path), Some(ALICE), Some(body)).await
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_missing_credential_rejected() {
    let app = app();
    let (status, body) = send(&app.router, Method::GET, &doc_path(), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_unknown_credential_rejected() {
    let app = app();
    let (status, body) = send(&app.router, Method::GET, &doc_path(), Some("nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
    assert!(app.components.sessions.is_empty());
}

#[tokio::test]
async fn test_credential_resolution_is_cached() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;
    send(&app.router, Method::GET, &path, Some(ALICE), None).await;
    send(&app.router, Method::GET, &path, Some(ALICE), None).await;

    assert_eq!(app.components.sessions.len(), 1);
    assert_eq!(app.components.metrics.snapshot().sessions_resolved, 1);
}

// =============================================================================
// Documents
// =============================================================================

#[tokio::test]
async fn test_create_then_snapshot() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;

    let (status, body) = send(&app.router, Method::GET, &path, Some(BOB), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 0);
    assert_eq!(body["content"]["blocks"][0]["text"], "hello");
    assert_eq!(body["positions"], json!([]));
}

#[tokio::test]
async fn test_create_without_body_makes_empty_document() {
    let app = app();
    let path = doc_path();
    let (status, body) = send(&app.router, Method::POST, &path, Some(ALICE), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["content"]["blocks"], json!([]));

    let (status, body) = send(&app.router, Method::POST, &path, Some(ALICE), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_EXISTS");
}

#[tokio::test]
async fn test_unknown_document_not_found() {
    let app = app();
    let (status, body) = send(&app.router, Method::GET, &doc_path(), Some(ALICE), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

// =============================================================================
// Steps and Events
// =============================================================================

#[tokio::test]
async fn test_submit_accepts_then_reports_stale() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;

    let (status, body) = submit(&app, &path, 0, "one").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 1);
    assert_eq!(body["steps"][0]["version"], 1);
    assert_eq!(body["steps"][0]["client_id"], "tab-1");
    assert_eq!(body["steps"][0]["user_id"], json!(app.alice));

    let (status, body) = submit(&app, &path, 0, "late").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "STALE");
    assert_eq!(body["current_version"], 1);
}

#[tokio::test]
async fn test_inapplicable_steps_bad_request() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;

    let body = json!({
        "version": 0,
        "steps": [{ "type": "remove_block", "index": 5 }],
        "client_id": "tab-1"
    });
    let (status, body) =
        send(&app.router, Method::POST, &format!("{}/steps", path), Some(ALICE), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_STEPS");
}

#[tokio::test]
async fn test_empty_client_id_bad_request() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;

    let body = json!({ "version": 0, "steps": [set_text("x")], "client_id": " " });
    let (status, body) =
        send(&app.router, Method::POST, &format!("{}/steps", path), Some(ALICE), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_events_since_older_version() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;
    submit(&app, &path, 0, "one").await;
    submit(&app, &path, 1, "two").await;

    let uri = format!("{}/events?version=1", path);
    let (status, body) = send(&app.router, Method::GET, &uri, Some(BOB), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
    assert_eq!(body["steps"].as_array().unwrap().len(), 1);
    assert_eq!(body["steps"][0]["step"], set_text("two"));
}

#[tokio::test]
async fn test_events_at_current_version_times_out_empty() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;

    let uri = format!("{}/events?version=0&timeout_ms=20", path);
    let (status, body) = send(&app.router, Method::GET, &uri, Some(BOB), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_evicted_history_is_gone() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;
    for version in 0..5 {
        submit(&app, &path, version, &format!("v{}", version + 1)).await;
    }

    let uri = format!("{}/events?version=1", path);
    let (status, body) = send(&app.router, Method::GET, &uri, Some(BOB), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "HISTORY_UNAVAILABLE");
}

#[tokio::test]
async fn test_events_ahead_of_document_bad_request() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;

    let uri = format!("{}/events?version=9", path);
    let (status, body) = send(&app.router, Method::GET, &uri, Some(BOB), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VERSION_OUT_OF_RANGE");
}

// =============================================================================
// Positions
// =============================================================================

#[tokio::test]
async fn test_positions_exclude_caller() {
    let app = app();
    let path = doc_path();
    create(&app, &path).await;
    let positions = format!("{}/positions", path);
    let block = Uuid::new_v4();

    let (status, body) = send(
        &app.router,
        Method::POST,
        &positions,
        Some(ALICE),
        Some(json!({ "entity_id": block })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["position"]["shortname"], "alice");
    assert_eq!(body["position"]["entity_id"], json!(block));

    let (_, seen_by_bob) = send(&app.router, Method::GET, &positions, Some(BOB), None).await;
    assert_eq!(seen_by_bob["positions"].as_array().unwrap().len(), 1);
    assert_eq!(seen_by_bob["positions"][0]["display_name"], "Alice");

    let (_, seen_by_alice) = send(&app.router, Method::GET, &positions, Some(ALICE), None).await;
    assert_eq!(seen_by_alice["positions"], json!([]));
}

// =============================================================================
// Observability
// =============================================================================

#[tokio::test]
async fn test_health_and_metrics() {
    let app = app();
    let (status, body) = send(&app.router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let path = doc_path();
    create(&app, &path).await;
    submit(&app, &path, 0, "one").await;

    let (status, body) = send(&app.router, Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counters"]["steps_accepted"], 1);
    assert_eq!(body["registry"]["instances"], 1);
    assert_eq!(body["sessions"], 1);
}
