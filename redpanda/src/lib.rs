//! Redpanda event bus for ticket notifications.
//!
//! This crate provides the production [`EventBus`] from `ticket-events-core`,
//! on top of rdkafka. Any Kafka-compatible broker works (Redpanda, Apache
//! Kafka, MSK...).
//!
//! # Fan-out
//!
//! Every server process must see every envelope, so each call to
//! [`EventBus::subscribe`] joins its own consumer group
//! (`<group_prefix>-<random suffix>`). Work-sharing consumer groups would
//! split events between processes and leave connections on some of them
//! without notifications.
//!
//! Fresh groups start at the end of the topic (`auto.offset.reset=latest`):
//! events published while a process was unsubscribed reach its clients
//! through log replay on reconnect, not through the bus.
//!
//! # Wire format
//!
//! Envelopes are bincode-encoded and keyed by ticket id, so events about
//! one ticket land on one partition and keep their relative order.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use ticket_events_core::event_bus::EventBus;
//! use ticket_events_redpanda::RedpandaEventBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::new("localhost:9092")?;
//!
//! let mut stream = bus.subscribe(&["ticket-events"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(envelope) => println!("{} from {}", envelope.event.id, envelope.origin),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use ticket_events_core::event_bus::{BusEnvelope, EventBus, EventBusError, EventStream};

const DEFAULT_GROUP_PREFIX: &str = "ticket-events";
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Redpanda event bus.
///
/// One producer is shared by all publishes; each subscription owns a
/// consumer driven by a background task that forwards into a bounded
/// channel.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use ticket_events_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(2))
///     .group_prefix("ticket-events-eu")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    group_prefix: String,
    buffer_size: usize,
}

impl RedpandaEventBus {
    /// Create a bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created (invalid broker list or configuration).
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

impl std::fmt::Debug for RedpandaEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaEventBus")
            .field("brokers", &self.brokers)
            .field("timeout", &self.timeout)
            .field("group_prefix", &self.group_prefix)
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Debug, Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    group_prefix: Option<String>,
    buffer_size: Option<usize>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated bootstrap servers (e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"1"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Prefix for the per-subscription consumer groups.
    ///
    /// Default: `"ticket-events"`
    #[must_use]
    pub fn group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_prefix = Some(prefix.into());
        self
    }

    /// Envelopes buffered between the consumer and the subscriber.
    ///
    /// Clamped to at least 1. Default: 1000
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let group_prefix = self
            .group_prefix
            .unwrap_or_else(|| DEFAULT_GROUP_PREFIX.to_string());
        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            group_prefix = %group_prefix,
            buffer_size,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            group_prefix,
            buffer_size,
        })
    }
}

/// Consumer group for one subscription: unique, so every process gets every envelope.
fn fan_out_group(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

fn decode(payload: Option<&[u8]>) -> Result<BusEnvelope, EventBusError> {
    let bytes = payload
        .ok_or_else(|| EventBusError::DeserializationFailed("Message has no payload".to_string()))?;
    bincode::deserialize(bytes)
        .map_err(|e| EventBusError::DeserializationFailed(format!("Failed to decode envelope: {e}")))
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &BusEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let encoded = bincode::serialize(envelope);
        let key = envelope.event.ticket_id.as_str().to_string();
        let event_id = envelope.event.id;

        Box::pin(async move {
            let payload = encoded.map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: format!("Failed to encode envelope: {e}"),
            })?;

            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        event_id = %event_id,
                        "Envelope published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish envelope");
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let group_id = fan_out_group(&self.group_prefix);
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;

        Box::pin(async move {
            // Offsets of a throwaway group are never read again, so nothing is committed
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "latest")
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(topics = ?topics, consumer_group = %group_id, "Subscribed to topics");

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The task owns the consumer; dropping the stream closes the channel and ends it
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut messages = consumer.stream();
                while let Some(received) = messages.next().await {
                    let item = match received {
                        Ok(message) => {
                            let decoded = decode(message.payload());
                            if let Ok(envelope) = &decoded {
                                tracing::trace!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    event_id = %envelope.event.id,
                                    "Received envelope"
                                );
                            }
                            decoded
                        },
                        Err(e) => Err(EventBusError::TransportError(format!(
                            "Failed to receive message: {e}"
                        ))),
                    };

                    if tx.send(item).await.is_err() {
                        break;
                    }
                }

                tracing::debug!(consumer_group = %group_id, "Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ticket_events_core::event::{Event, EventId, EventType, Payload, TicketId};
    use ticket_events_core::event_bus::NodeId;

    fn envelope() -> BusEnvelope {
        BusEnvelope {
            origin: NodeId::new("node-a"),
            event: Event {
                id: EventId::new(),
                ticket_id: TicketId::new("T-9"),
                event_type: EventType::CommentAdded,
                payload: Payload::new(r#"{"body":"hi"}"#),
                created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            },
        }
    }

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn builder_without_brokers_fails() {
        let result = RedpandaEventBus::builder().build();
        assert!(matches!(result, Err(EventBusError::ConnectionFailed(_))));
    }

    #[test]
    fn every_subscription_gets_its_own_group() {
        let a = fan_out_group("ticket-events");
        let b = fan_out_group("ticket-events");
        assert!(a.starts_with("ticket-events-"));
        assert_ne!(a, b);
    }

    #[test]
    fn decode_reads_bincode_envelopes() {
        let original = envelope();
        let bytes = bincode::serialize(&original).unwrap();
        assert_eq!(decode(Some(&bytes)).unwrap(), original);
    }

    #[test]
    fn decode_rejects_empty_and_garbage_messages() {
        assert!(matches!(decode(None), Err(EventBusError::DeserializationFailed(_))));
        assert!(matches!(
            decode(Some(b"not bincode")),
            Err(EventBusError::DeserializationFailed(_))
        ));
    }
}
