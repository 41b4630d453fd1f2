//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to decide whether to route
//! traffic here.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
}

/// Liveness check. Does not touch dependencies.
///
/// ```text
/// GET /health
/// {"status":"ok","version":"0.1.0"}
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness
    pub ready: bool,
    /// The hub dispatch loop is running
    pub hub: bool,
    /// The event log answered a head query
    pub event_log: bool,
}

/// Readiness check: the hub is running and the log head can be read.
///
/// ```text
/// GET /health/ready
/// 200 {"ready":true,"hub":true,"event_log":true}
/// 503 {"ready":false,"hub":true,"event_log":false}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let hub = state.hub.is_running();
    let event_log = match state.log.latest().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: event log unreachable");
            false
        },
    };

    let ready = hub && event_log;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse { ready, hub, event_log }))
}
