//! Router configuration.

use crate::handlers::{health, stream, websocket};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// - `GET /health`, `GET /health/ready`: no principal required
/// - `GET /api/events/stream`: SSE with replay
/// - `GET /api/events/ws`: WebSocket live fan-out
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/events/stream", get(stream::stream_events))
        .route("/events/ws", get(websocket::handle));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
