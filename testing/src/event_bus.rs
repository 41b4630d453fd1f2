//! In-memory event bus shared by simulated server processes.
//!
//! Clone one [`InMemoryEventBus`] into several bridges to model a cluster:
//! every subscriber of a topic receives every envelope published after it
//! subscribed. [`InMemoryEventBus::set_available`] simulates a broker outage.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use ticket_events_core::event_bus::{BusEnvelope, EventBus, EventBusError, EventStream};
use tokio::sync::broadcast;

/// Per-topic buffer before slow subscribers start lagging.
const TOPIC_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Inner {
    topics: HashMap<String, broadcast::Sender<BusEnvelope>>,
    available: bool,
    published: Vec<(String, BusEnvelope)>,
}

/// In-memory [`EventBus`] with fan-out semantics.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use ticket_events_core::event_bus::{BusEnvelope, EventBus, NodeId};
/// use ticket_events_testing::{InMemoryEventBus, fixtures::event_at};
/// use ticket_events_core::event::EventType;
///
/// # tokio_test::block_on(async {
/// let bus = InMemoryEventBus::new();
/// let mut stream = bus.subscribe(&["ticket-events"]).await.unwrap();
///
/// let envelope = BusEnvelope { origin: NodeId::new("a"), event: event_at(1, 1, EventType::TicketCreated) };
/// bus.publish("ticket-events", &envelope).await.unwrap();
///
/// assert_eq!(stream.next().await.unwrap().unwrap(), envelope);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventBus {
    /// Create an available bus with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                topics: HashMap::new(),
                available: true,
                published: Vec::new(),
            })),
        }
    }

    /// Take the bus down or bring it back.
    ///
    /// Going down ends every open subscription stream and makes publish and
    /// subscribe fail until the bus is available again.
    pub fn set_available(&self, available: bool) {
        let mut inner = self.inner.write().unwrap();
        inner.available = available;
        if !available {
            inner.topics.clear();
        }
    }

    /// Whether the bus currently accepts publishes and subscriptions.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.read().unwrap().available
    }

    /// Every successfully published `(topic, envelope)`, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, BusEnvelope)> {
        self.inner.read().unwrap().published.clone()
    }

    /// Live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .read()
            .unwrap()
            .topics
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn receiver(inner: &mut Inner, topic: &str) -> broadcast::Receiver<BusEnvelope> {
        inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_stream(
    mut receiver: broadcast::Receiver<BusEnvelope>,
) -> impl futures::Stream<Item = Result<BusEnvelope, EventBusError>> + Send {
    async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(envelope) => yield Ok(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    yield Err(EventBusError::TransportError(format!(
                        "subscriber lagged, {skipped} envelopes skipped"
                    )));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &BusEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        Box::pin(async move {
            let mut inner = self.inner.write().unwrap();
            if !inner.available {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "bus unavailable".to_string(),
                });
            }
            if let Some(sender) = inner.topics.get(&topic) {
                // No subscribers is not an error on a fan-out bus
                let _ = sender.send(envelope.clone());
            }
            inner.published.push((topic, envelope));
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
        Box::pin(async move {
            let mut inner = self.inner.write().unwrap();
            if !inner.available {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "bus unavailable".to_string(),
                });
            }
            let streams: Vec<_> = topics
                .iter()
                .map(|topic| topic_stream(Self::receiver(&mut inner, topic)).boxed())
                .collect();
            let merged: EventStream = Box::pin(stream::select_all(streams));
            Ok(merged)
        })
    }
}
