//! Prometheus metrics for the notification core.
//!
//! Metric names are shared constants so dashboards and tests agree on them.
//! The Prometheus exporter renders dots as underscores.
//!
//! # Example
//!
//! ```rust,no_run
//! use ticket_events_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Live full-duplex connections held by the hub.
pub const HUB_CONNECTIONS_ACTIVE: &str = "hub.connections.active";
/// Events placed on a connection queue.
pub const HUB_EVENTS_DELIVERED: &str = "hub.events.delivered";
/// Connections removed by the hub because their queue was full or closed.
pub const HUB_CONNECTIONS_DROPPED: &str = "hub.connections.dropped";
/// Frames written by streaming sessions.
pub const SESSION_FRAMES_SENT: &str = "session.frames.sent";
/// Failed log reads during replay or polling.
pub const SESSION_POLL_FAILURES: &str = "session.poll.failures";
/// Failed publishes to the bus.
pub const BRIDGE_PUBLISH_FAILURES: &str = "bridge.publish.failures";
/// Foreign events fed into the local hub from the bus.
pub const BRIDGE_EVENTS_INGESTED: &str = "bridge.events.ingested";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the scrape listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built. A recorder that is
    /// already installed (e.g., by another test) is tolerated with a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        describe_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(async move {
                    // The exporter error type is opaque
                    if exporter.await.is_err() {
                        tracing::error!("Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_gauge!(HUB_CONNECTIONS_ACTIVE, "Live full-duplex connections");
    describe_counter!(HUB_EVENTS_DELIVERED, "Events enqueued on connection queues");
    describe_counter!(
        HUB_CONNECTIONS_DROPPED,
        "Connections dropped by the hub (label reason: overflow, closed)"
    );
    describe_counter!(SESSION_FRAMES_SENT, "Frames written by streaming sessions");
    describe_counter!(SESSION_POLL_FAILURES, "Transient event log read failures");
    describe_counter!(BRIDGE_PUBLISH_FAILURES, "Failed publishes to the event bus");
    describe_counter!(BRIDGE_EVENTS_INGESTED, "Foreign events delivered to the local hub");
}

/// Hub metrics recorder.
pub struct HubMetrics;

impl HubMetrics {
    /// Record the current connection count.
    #[allow(clippy::cast_precision_loss)] // Connection counts fit in f64
    pub fn record_active(count: usize) {
        gauge!(HUB_CONNECTIONS_ACTIVE).set(count as f64);
    }

    /// Record events enqueued by one broadcast.
    pub fn record_delivered(count: usize) {
        counter!(HUB_EVENTS_DELIVERED).increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record a forced drop.
    pub fn record_dropped(reason: &'static str) {
        counter!(HUB_CONNECTIONS_DROPPED, "reason" => reason).increment(1);
    }
}

/// Streaming session metrics recorder.
pub struct SessionMetrics;

impl SessionMetrics {
    /// Record a frame written to a client.
    pub fn record_frame() {
        counter!(SESSION_FRAMES_SENT).increment(1);
    }

    /// Record a swallowed log read failure.
    pub fn record_poll_failure() {
        counter!(SESSION_POLL_FAILURES).increment(1);
    }
}

/// Bus bridge metrics recorder.
pub struct BridgeMetrics;

impl BridgeMetrics {
    /// Record a failed publish.
    pub fn record_publish_failure() {
        counter!(BRIDGE_PUBLISH_FAILURES).increment(1);
    }

    /// Record a foreign event handed to the hub.
    pub fn record_ingested() {
        counter!(BRIDGE_EVENTS_INGESTED).increment(1);
    }
}
