//! HTTP ingestion surface for the admission gate.
//!
//! Provides REST API endpoints for:
//! - Health checks
//! - Admitting occurrences posted by ingestion handlers
//! - Resolving and inspecting alert records
//! - Inspecting gate state

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::admission::{AdmissionGate, Occurrence};
use crate::config::{PolicySpec, PolicyTable};
use crate::error::GateError;

/// Server state shared across handlers.
pub struct ServerState {
    /// Admission facade
    pub gate: AdmissionGate,
    /// Policies applied when a request carries none
    pub policies: PolicyTable,
}

impl ServerState {
    #[must_use]
    pub fn new(gate: AdmissionGate, policies: PolicyTable) -> Self {
        Self { gate, policies }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/admit", post(admit_handler))
        .route("/api/alerts/{fingerprint}", get(alert_handler))
        .route("/api/alerts/{fingerprint}/resolve", post(resolve_handler))
        .route("/api/gates/{source}/{fingerprint}", get(gate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn run_server(state: Arc<ServerState>, addr: &str) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Alert gate listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    store: &'static str,
}

/// Occurrence posted by an ingestion handler.
#[derive(Debug, Deserialize)]
pub struct AdmitRequest {
    /// Producer integration name
    pub source: String,
    /// Producer-assigned condition identity
    pub fingerprint: String,
    /// Occurrence time; server time when absent
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    /// Per-call policy; the configured policy for `source` when absent
    #[serde(default)]
    pub policy: Option<PolicySpec>,
    /// Opaque producer payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Body for resolving an alert. The whole body is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    retryable: bool,
}

/// Maps gate errors onto HTTP statuses. Denials never reach this path.
struct ApiError(GateError);

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GateError::InvalidKey { .. }
            | GateError::InvalidFingerprint
            | GateError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            GateError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::NotInitialized | GateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(error = %self.0, "Request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                retryable: self.0.is_retryable(),
            }),
        )
            .into_response()
    }
}

fn not_found(what: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("{what} not found"),
            retryable: false,
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        store: state.gate.store_name(),
    })
}

async fn admit_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<AdmitRequest>,
) -> Result<Response, ApiError> {
    let policy = request
        .policy
        .map_or_else(|| state.policies.policy_for(&request.source), Into::into);

    let mut occurrence =
        Occurrence::new(request.source, request.fingerprint).with_payload(request.payload);
    occurrence.occurred_at = request.occurred_at;

    let admission = state.gate.admit(occurrence, &policy).await?;
    Ok(Json(admission).into_response())
}

async fn alert_handler(
    State(state): State<Arc<ServerState>>,
    Path(fingerprint): Path<String>,
) -> Result<Response, ApiError> {
    match state.gate.tracker().get(&fingerprint).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok(not_found(format!("alert {fingerprint}"))),
    }
}

async fn resolve_handler(
    State(state): State<Arc<ServerState>>,
    Path(fingerprint): Path<String>,
    request: Option<Json<ResolveRequest>>,
) -> Result<Response, ApiError> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let record = state
        .gate
        .tracker()
        .resolve(&fingerprint, request.payload)
        .await?;
    info!(alert_id = %record.alert_id, "Alert resolved");
    Ok(Json(record).into_response())
}

async fn gate_handler(
    State(state): State<Arc<ServerState>>,
    Path((source, fingerprint)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    match state.gate.gate_state(&source, &fingerprint).await? {
        Some(gate) => Ok(Json(gate).into_response()),
        None => Ok(not_found(format!("gate {source}/{fingerprint}"))),
    }
}
