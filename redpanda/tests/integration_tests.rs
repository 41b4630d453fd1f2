//! Integration tests for [`RedpandaEventBus`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Envelope publish/subscribe round-trip
//! - Fan-out: every subscription sees every envelope
//! - Per-ticket ordering
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p ticket-events-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use ticket_events_core::event::{Event, EventId, EventType, Payload, TicketId};
use ticket_events_core::event_bus::{BusEnvelope, EventBus, EventStream, NodeId};
use ticket_events_redpanda::RedpandaEventBus;

const TOPIC: &str = "ticket-events-it";
const WARMUP_TICKET: &str = "warmup";

// ============================================================================
// Helpers
// ============================================================================

fn envelope(ticket: &str, event_type: EventType) -> BusEnvelope {
    BusEnvelope {
        origin: NodeId::new("node-it"),
        event: Event {
            id: EventId::new(),
            ticket_id: TicketId::new(ticket),
            event_type,
            payload: Payload::default(),
            created_at: Utc::now(),
        },
    }
}

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Publish warmup envelopes until the topic exists and metadata has propagated.
async fn ensure_topic_exists(bus: &RedpandaEventBus) {
    for attempt in 1..=60 {
        if bus
            .publish(TOPIC, &envelope(WARMUP_TICKET, EventType::TicketCreated))
            .await
            .is_ok()
        {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Failed to create topic {TOPIC}");
    }
}

/// Collect `count` non-warmup envelopes.
async fn collect(stream: &mut EventStream, count: usize) -> Vec<BusEnvelope> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(20), async {
        while received.len() < count {
            if let Some(result) = stream.next().await {
                let envelope = result.expect("Failed to receive envelope");
                if envelope.event.ticket_id.as_str() != WARMUP_TICKET {
                    received.push(envelope);
                }
            }
        }
    })
    .await
    .expect("Timeout waiting for envelopes");
    received
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_envelope_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::new(&brokers).expect("Failed to create event bus");
    ensure_topic_exists(&bus).await;

    let mut stream = bus.subscribe(&[TOPIC]).await.expect("Failed to subscribe");
    // Consumer needs time to join its group and get partitions assigned
    tokio::time::sleep(Duration::from_secs(5)).await;

    let sent = envelope("T-1", EventType::StatusChanged);
    bus.publish(TOPIC, &sent).await.expect("Failed to publish");

    let received = collect(&mut stream, 1).await;
    assert_eq!(received, vec![sent]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_every_subscription_sees_every_envelope() {
    let (_kafka, brokers) = start_kafka().await;
    let publisher = RedpandaEventBus::new(&brokers).expect("Failed to create event bus");
    ensure_topic_exists(&publisher).await;

    // Two "processes"
    let node_a = RedpandaEventBus::new(&brokers).unwrap();
    let node_b = RedpandaEventBus::new(&brokers).unwrap();
    let mut on_a = node_a.subscribe(&[TOPIC]).await.unwrap();
    let mut on_b = node_b.subscribe(&[TOPIC]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let sent: Vec<_> = (0..5)
        .map(|n| envelope(&format!("T-{n}"), EventType::CommentAdded))
        .collect();
    for envelope in &sent {
        publisher.publish(TOPIC, envelope).await.unwrap();
    }

    let mut ids_a: Vec<_> = collect(&mut on_a, 5).await.into_iter().map(|e| e.event.id).collect();
    let mut ids_b: Vec<_> = collect(&mut on_b, 5).await.into_iter().map(|e| e.event.id).collect();
    let mut expected: Vec<_> = sent.iter().map(|e| e.event.id).collect();
    ids_a.sort();
    ids_b.sort();
    expected.sort();

    assert_eq!(ids_a, expected);
    assert_eq!(ids_b, expected);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_events_for_one_ticket_keep_their_order() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::new(&brokers).unwrap();
    ensure_topic_exists(&bus).await;

    let mut stream = bus.subscribe(&[TOPIC]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let sent: Vec<_> = [
        EventType::TicketCreated,
        EventType::TicketAssigned,
        EventType::StatusChanged,
        EventType::CommentAdded,
    ]
    .into_iter()
    .map(|event_type| envelope("T-ordered", event_type))
    .collect();
    for envelope in &sent {
        bus.publish(TOPIC, envelope).await.unwrap();
    }

    let received = collect(&mut stream, sent.len()).await;
    assert_eq!(received, sent);
}
