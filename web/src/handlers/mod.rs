//! HTTP request handlers.

pub mod health;
pub mod stream;
pub mod websocket;

pub use health::{health_check, readiness_check};
