//! # Ticket Events Runtime
//!
//! The moving parts of the notification core:
//!
//! - [`hub`]: single-owner dispatch loop fanning events out to live
//!   full-duplex connections, dropping slow consumers
//! - [`session`]: long-lived server-to-client stream driven by cursor replay
//!   and polling
//! - [`bridge`]: cross-process delivery over the event bus
//! - [`notifier`]: the local publish entrypoint (log, then hub, then bus)
//! - [`retry`]: exponential backoff
//! - [`metrics`]: metric names and the Prometheus exporter
//!
//! Every long-running piece stops through a `watch::Sender<bool>` shutdown
//! signal.

use tokio::sync::watch;

pub mod bridge;
pub mod hub;
pub mod metrics;
pub mod notifier;
pub mod retry;
pub mod session;

pub use bridge::{BridgeConfig, BridgeError, BusBridge};
pub use hub::{Connection, ConnectionId, Hub, HubConfig, HubError, HubHandle, Subscription};
pub use notifier::{NotifyError, Notifier};
pub use session::{Frame, SessionConfig, SessionError, SessionOutcome, SessionReport, StreamingSession};

/// Resolves once `shutdown` reads `true`.
///
/// A dropped sender means no shutdown will ever be signalled, so this then
/// never resolves.
pub async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
