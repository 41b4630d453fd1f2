//! Axum transports for ticket notifications.
//!
//! Two ways for a client to receive ticket events:
//!
//! - **SSE** (`GET /api/events/stream`): one streaming session per request,
//!   driven by cursor replay against the event log. Survives reconnects
//!   without gaps via `Last-Event-ID`.
//! - **WebSocket** (`GET /api/events/ws`): a hub connection with a bounded
//!   outbound queue. Lowest latency, no replay.
//!
//! Both filter restricted event types by the principal's role. The principal
//! comes from the authentication gateway in front of this service
//! (`X-Principal-Id` / `X-Principal-Role`).
//!
//! # Example
//!
//! ```ignore
//! let state = AppState::new(log, hub.handle(), config.session_config(), shutdown_rx);
//! let app = build_router(state);
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod wire;

pub use config::Config;
pub use error::AppError;
pub use extractors::{AuthenticatedPrincipal, CorrelationId, LastEventId};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use routes::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
