//! Cross-process bus bridge.
//!
//! Each server process holds its own subset of live connections. The bridge
//! publishes events accepted locally to a shared topic, and feeds events
//! published by *other* processes into the local hub:
//!
//! ```text
//!   notifier ──publish──► [ bus topic ] ──subscribe──► ingest loop ──► local hub
//!                                                        │
//!                                   origin == this node? └─► skip
//! ```
//!
//! Envelopes this node published itself are skipped: the notifier already
//! broadcast them locally. When the bus is down, publishing fails (the caller
//! logs and carries on) and the ingest loop keeps re-subscribing with
//! exponential backoff. Local fan-out is unaffected either way.

use crate::hub::{HubError, HubHandle};
use crate::metrics::BridgeMetrics;
use crate::retry::RetryPolicy;
use crate::shutdown_signalled;
use futures::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use ticket_events_core::event::Event;
use ticket_events_core::event_bus::{BusEnvelope, EventBus, EventBusError, EventStream, NodeId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default topic carrying ticket events.
pub const DEFAULT_TOPIC: &str = "ticket-events";

/// Errors from bridge lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// `start` was called twice.
    #[error("Bus bridge already started")]
    AlreadyStarted,

    /// `stop` was called on a bridge that is not running.
    #[error("Bus bridge is not running")]
    NotRunning,
}

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Topic shared by every process.
    pub topic: String,
    /// This process's identity on the bus.
    pub node_id: NodeId,
    /// Backoff between re-subscription attempts.
    pub retry: RetryPolicy,
}

impl BridgeConfig {
    /// Set the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the node id.
    #[must_use]
    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }

    /// Set the re-subscription backoff.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            node_id: NodeId::random(),
            retry: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .jitter(0.2)
                .build(),
        }
    }
}

/// Bridges the local hub to the shared event bus.
pub struct BusBridge {
    bus: Arc<dyn EventBus>,
    hub: HubHandle,
    config: BridgeConfig,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BusBridge {
    /// Create a stopped bridge.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, hub: HubHandle, config: BridgeConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            bus,
            hub,
            config,
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// This process's node id.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    /// Publish a locally accepted event to the shared topic.
    ///
    /// Call only after the event is in the log.
    ///
    /// # Errors
    ///
    /// Returns the bus error; the caller degrades to local-only delivery.
    pub async fn publish(&self, event: &Event) -> Result<(), EventBusError> {
        let envelope = BusEnvelope {
            origin: self.config.node_id.clone(),
            event: event.clone(),
        };
        self.bus
            .publish(&self.config.topic, &envelope)
            .await
            .inspect_err(|_| BridgeMetrics::record_publish_failure())
    }

    /// Spawn the ingest loop.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::AlreadyStarted`] if it is already running.
    pub fn start(&self) -> Result<(), BridgeError> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return Err(BridgeError::AlreadyStarted);
        }

        self.shutdown.send_replace(false);
        let ingest = Ingest {
            bus: Arc::clone(&self.bus),
            hub: self.hub.clone(),
            topic: self.config.topic.clone(),
            node_id: self.config.node_id.clone(),
            retry: self.config.retry.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        *task = Some(tokio::spawn(ingest.run()));
        Ok(())
    }

    /// Stop the ingest loop and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotRunning`] if it was not started.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BridgeError::NotRunning)?;

        self.shutdown.send_replace(true);
        if let Err(e) = task.await {
            warn!(error = %e, "Bus bridge ingest loop ended abnormally");
        }
        Ok(())
    }
}

impl Drop for BusBridge {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// State owned by the ingest task.
struct Ingest {
    bus: Arc<dyn EventBus>,
    hub: HubHandle,
    topic: String,
    node_id: NodeId,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

enum StreamEnd {
    Shutdown,
    /// The bus closed the stream; `received` says whether anything arrived.
    Ended { received: bool },
}

impl Ingest {
    async fn run(mut self) {
        info!(topic = %self.topic, node_id = %self.node_id, "Bus bridge ingest started");
        let mut attempt = 0;

        loop {
            let subscribed = tokio::select! {
                biased;
                () = shutdown_signalled(&mut self.shutdown) => break,
                subscribed = self.bus.subscribe(&[self.topic.as_str()]) => subscribed,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(topic = %self.topic, "Subscribed to event bus");
                    match self.forward(&mut stream).await {
                        StreamEnd::Shutdown => break,
                        // A subscription that delivers nothing does not count
                        // as recovery, so the backoff keeps growing
                        StreamEnd::Ended { received } => {
                            if received {
                                attempt = 0;
                            }
                        }
                    }
                    warn!(topic = %self.topic, attempt, "Event bus stream ended, local-only delivery until re-subscribed");
                }
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, attempt, "Event bus unavailable, local-only delivery");
                }
            }

            let delay = self.retry.jittered_delay(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                biased;
                () = shutdown_signalled(&mut self.shutdown) => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(topic = %self.topic, "Bus bridge ingest stopped");
    }

    async fn forward(&mut self, stream: &mut EventStream) -> StreamEnd {
        let mut received = false;
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown_signalled(&mut self.shutdown) => return StreamEnd::Shutdown,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(envelope)) => {
                    received = true;
                    if envelope.origin == self.node_id {
                        debug!(event_id = %envelope.event.id, "Skipping self-published event");
                        continue;
                    }
                    debug!(event_id = %envelope.event.id, origin = %envelope.origin, "Ingesting foreign event");
                    match self.hub.broadcast(envelope.event).await {
                        Ok(()) => BridgeMetrics::record_ingested(),
                        Err(HubError::NotRunning) => {
                            error!("Local hub is not running, dropping foreign event");
                        }
                        Err(e) => error!(error = %e, "Failed to hand foreign event to hub"),
                    }
                }
                Some(Err(e)) => {
                    warn!(topic = %self.topic, error = %e, "Error receiving envelope from event bus");
                }
                None => return StreamEnd::Ended { received },
            }
        }
    }
}
