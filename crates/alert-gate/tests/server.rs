//! HTTP surface tests driven through the router without a listener.

use alert_gate::server::{build_router, ServerState};
use alert_gate::{AdmissionGate, ManualClock, MemoryStateStore, PolicyTable};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(policies: PolicyTable) -> Router {
    let gate = AdmissionGate::builder()
        .store(Arc::new(MemoryStateStore::new()))
        .clock(Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(),
        )))
        .build()
        .unwrap();
    build_router(Arc::new(ServerState::new(gate, policies)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app(PolicyTable::default());
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn test_admit_with_request_policy() {
    let app = app(PolicyTable::default());
    let request = json!({
        "source": "am",
        "fingerprint": "fp1",
        "occurred_at": "2025-07-01T00:00:00Z",
        "policy": {"window_secs": 300, "backoff_secs": 600, "min_count": 2},
        "payload": {"alertname": "HighErrorRate"}
    });

    let (status, body) = send(&app, "POST", "/api/admit", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["verdict"], "first_seen");
    assert_eq!(body["alert_id"], "fp1");
    assert_eq!(body["gate"]["count"], 1);

    let (status, body) = send(&app, "POST", "/api/admit", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
    assert_eq!(body["verdict"], "admitted");
    assert_eq!(body["gate"]["suppressed_until"], "2025-07-01T00:10:00Z");
}

#[tokio::test]
async fn test_admit_uses_source_policy() {
    let policies = PolicyTable::from_toml(
        r#"
        [default]
        min_count = 1

        [sources.noisy]
        min_count = 5
        "#,
    )
    .unwrap();
    let app = app(policies);

    let (_, body) = send(
        &app,
        "POST",
        "/api/admit",
        Some(json!({"source": "noisy", "fingerprint": "fp1"})),
    )
    .await;
    assert_eq!(body["allowed"], false);

    let (_, body) = send(
        &app,
        "POST",
        "/api/admit",
        Some(json!({"source": "quiet", "fingerprint": "fp1"})),
    )
    .await;
    assert_eq!(body["allowed"], true);
}

#[tokio::test]
async fn test_admit_blank_key_is_bad_request() {
    let app = app(PolicyTable::default());
    let (status, body) = send(
        &app,
        "POST",
        "/api/admit",
        Some(json!({"source": "am", "fingerprint": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_alert_lifecycle_endpoints() {
    let app = app(PolicyTable::default());

    let (status, _) = send(&app, "GET", "/api/alerts/fp1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(
        &app,
        "POST",
        "/api/admit",
        Some(json!({"source": "am", "fingerprint": "fp1", "payload": {"v": 1}})),
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/alerts/fp1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "firing");
    assert_eq!(body["payload"]["v"], 1);

    let (status, body) = send(
        &app,
        "POST",
        "/api/alerts/fp1/resolve",
        Some(json!({"payload": {"v": 2}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "resolved");
    assert_eq!(body["alert_id"], "fp1");
    assert_eq!(body["started_at"], "2025-07-01T00:00:00Z");
}

#[tokio::test]
async fn test_resolve_without_body() {
    let app = app(PolicyTable::default());

    let (status, body) = send(&app, "POST", "/api/alerts/fp2/resolve", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "resolved");
    assert_eq!(body["payload"], Value::Null);
}

#[tokio::test]
async fn test_gate_state_endpoint() {
    let app = app(PolicyTable::default());

    let (status, _) = send(&app, "GET", "/api/gates/am/fp1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(
        &app,
        "POST",
        "/api/admit",
        Some(json!({"source": "am", "fingerprint": "fp1"})),
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/gates/am/fp1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["suppressed_until"], Value::Null);
}
