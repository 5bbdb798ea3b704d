//! HTTP request handlers.

use super::AppState;
use crate::model::ProbeKind;
use crate::probe::validate_target;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;

// ============================================================================
// Snapshots
// ============================================================================

pub async fn handle_get_interfaces(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.get_interfaces())
}

pub async fn handle_get_connections(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.get_connection_summary())
}

pub async fn handle_get_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.snapshot())
}

pub async fn handle_get_probe(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> impl IntoResponse {
    let kind: ProbeKind = match kind.parse() {
        Ok(k) => k,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    match state.engine.get_latest_probe_record(kind) {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, "No result yet").into_response(),
    }
}

// ============================================================================
// Probe requests
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub target: String,
}

/// Run a probe and wait for its result. Traceroute and ping take a JSON body
/// `{"target": "..."}`; speed test takes none.
pub async fn handle_run_probe(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let kind: ProbeKind = match kind.parse() {
        Ok(k) => k,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let handle = match kind {
        ProbeKind::SpeedTest => state.engine.request_speed_test(),
        ProbeKind::Traceroute | ProbeKind::Ping => {
            let req: TargetRequest = match serde_json::from_slice(&body) {
                Ok(r) => r,
                Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            };
            if let Err(e) = validate_target(&req.target) {
                return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
            }
            if kind == ProbeKind::Traceroute {
                state.engine.request_traceroute(&req.target)
            } else {
                state.engine.request_ping(&req.target)
            }
        }
    };

    let result = handle.result().await;
    let status = if result.is_error() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    (status, Json(result)).into_response()
}
