//! Event bus abstraction for cross-process fan-out.
//!
//! Each server process holds its own subset of live connections. The event bus
//! carries events accepted on one process to every other process so their hubs
//! can deliver them too.
//!
//! # Architecture
//!
//! ```text
//!  process A                                   process B
//! ┌──────────────┐                            ┌──────────────┐
//! │   emit()     │                            │              │
//! └──────┬───────┘                            │              │
//!        ▼                                    │              │
//! ┌──────────────┐                            │              │
//! │ 1. Append to │◄─── Source of truth        │              │
//! │   event log  │                            │              │
//! └──────┬───────┘                            │              │
//!        ▼                                    │              │
//! ┌──────────────┐      ┌────────────┐       ┌┴─────────────┐
//! │ 2. Publish   │─────►│ event bus  │──────►│ bridge ingest│
//! │ to event bus │      │  (topic)   │       │  → local hub │
//! └──────────────┘      └────────────┘       └──────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Log first**: events are appended to the log before publishing, so a
//!   consumer never sees an event it cannot re-fetch on reconnect
//! - **At-least-once delivery**: envelopes may arrive more than once
//! - **Best effort**: the bus is an enhancement over local delivery; when it is
//!   down, processes degrade to local-only fan-out
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (in `ticket-events-testing`): For testing
//! - `RedpandaEventBus` (in `ticket-events-redpanda`): For production (Kafka-compatible)

use crate::event::Event;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an envelope
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Identity of a server process on the bus.
///
/// Used to recognise envelopes a process published itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A random node id, for processes that are not given one.
    #[must_use]
    pub fn random() -> Self {
        Self(format!("node-{}", uuid::Uuid::new_v4().simple()))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What travels on the bus: an event plus the process that published it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// Publishing process.
    pub origin: NodeId,
    /// The event, exactly as stored in the log.
    pub event: Event,
}

/// Stream of envelopes from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<BusEnvelope, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; the bridge publishes from
/// whichever task emitted the event.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn EventBus>`).
pub trait EventBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        envelope: &BusEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of envelopes.
    ///
    /// Every subscriber receives every envelope published after it subscribed
    /// (fan-out, not work sharing): each process must see every event.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
