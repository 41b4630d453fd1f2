//! Integration tests for cross-process delivery
//!
//! Two simulated processes, each with its own log handle, hub, bridge and
//! notifier, share one in-memory bus.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticket_events_core::access::{Principal, Role};
use ticket_events_core::event::{EventType, Payload, TicketId};
use ticket_events_core::event_bus::{BusEnvelope, EventBus, EventBusError, EventStream, NodeId};
use ticket_events_runtime::bridge::{BridgeConfig, BridgeError, BusBridge};
use ticket_events_runtime::hub::{Hub, HubConfig, Subscription};
use ticket_events_runtime::notifier::Notifier;
use ticket_events_runtime::retry::RetryPolicy;
use ticket_events_testing::{InMemoryEventBus, InMemoryEventLog};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const TOPIC: &str = "ticket-events-test";

// ============================================================================
// Harness
// ============================================================================

struct Process {
    hub: Hub,
    bridge: Arc<BusBridge>,
    notifier: Notifier,
}

impl Process {
    fn start(name: &str, log: &InMemoryEventLog, bus: &InMemoryEventBus) -> Self {
        let hub = Hub::new(HubConfig::default());
        hub.start().unwrap();

        let config = BridgeConfig::default()
            .with_topic(TOPIC)
            .with_node_id(NodeId::new(name))
            .with_retry(
                RetryPolicy::builder()
                    .initial_delay(Duration::from_millis(10))
                    .max_delay(Duration::from_millis(50))
                    .build(),
            );
        let bridge = Arc::new(BusBridge::new(Arc::new(bus.clone()), hub.handle(), config));
        bridge.start().unwrap();

        let notifier = Notifier::new(Arc::new(log.clone()), hub.handle()).with_bridge(Arc::clone(&bridge));
        Self {
            hub,
            bridge,
            notifier,
        }
    }

    async fn connect(&self) -> Subscription {
        let handle = self.hub.handle();
        let subscription = handle
            .connect(Principal::new("agent", Role::Agent))
            .await
            .unwrap();
        let mut watch = handle.watch();
        timeout(WAIT, watch.wait_for(|s| s.connections.contains(&subscription.id())))
            .await
            .unwrap()
            .unwrap();
        subscription
    }

    async fn emit(&self, event_type: EventType) -> ticket_events_core::event::Event {
        self.notifier
            .emit(TicketId::new("T-7"), event_type, Payload::default())
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.bridge.stop().await.unwrap();
        self.hub.stop().await.unwrap();
    }
}

async fn wait_for_subscribers(bus: &InMemoryEventBus, count: usize) {
    timeout(WAIT, async {
        while bus.subscriber_count(TOPIC) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("bridges did not subscribe");
}

async fn assert_nothing_more(subscription: &mut Subscription) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(subscription.try_recv().is_err(), "unexpected extra delivery");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn event_emitted_on_one_process_reaches_the_other_and_is_local_once() {
    let log = InMemoryEventLog::new();
    let bus = InMemoryEventBus::new();
    let a = Process::start("node-a", &log, &bus);
    let b = Process::start("node-b", &log, &bus);
    wait_for_subscribers(&bus, 2).await;

    let mut on_a = a.connect().await;
    let mut on_b = b.connect().await;

    let event = a.emit(EventType::TicketAssigned).await;

    let remote = timeout(WAIT, on_b.recv()).await.unwrap().unwrap();
    assert_eq!(*remote, event);

    let local = timeout(WAIT, on_a.recv()).await.unwrap().unwrap();
    assert_eq!(*local, event);

    assert_nothing_more(&mut on_a).await;
    assert_nothing_more(&mut on_b).await;

    // Log first, then bus
    assert_eq!(log.events(), vec![event.clone()]);
    assert_eq!(bus.published().len(), 1);
    assert_eq!(bus.published()[0].1.origin, NodeId::new("node-a"));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn bus_outage_degrades_to_local_delivery_and_recovers() {
    let log = InMemoryEventLog::new();
    let bus = InMemoryEventBus::new();
    let a = Process::start("node-a", &log, &bus);
    let b = Process::start("node-b", &log, &bus);
    wait_for_subscribers(&bus, 2).await;

    let mut on_a = a.connect().await;
    let mut on_b = b.connect().await;

    bus.set_available(false);

    // Emit still succeeds: the event is in the log and delivered locally
    let during = a.emit(EventType::CommentAdded).await;
    let local = timeout(WAIT, on_a.recv()).await.unwrap().unwrap();
    assert_eq!(*local, during);
    assert_nothing_more(&mut on_b).await;
    assert_eq!(log.len(), 1);

    bus.set_available(true);
    wait_for_subscribers(&bus, 2).await;

    let after = a.emit(EventType::StatusChanged).await;
    let remote = timeout(WAIT, on_b.recv()).await.unwrap().unwrap();
    assert_eq!(*remote, after);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn bridge_lifecycle_errors() {
    let bus = InMemoryEventBus::new();
    let hub = Hub::new(HubConfig::default());
    hub.start().unwrap();
    let bridge = BusBridge::new(Arc::new(bus), hub.handle(), BridgeConfig::default());

    assert_eq!(bridge.stop().await, Err(BridgeError::NotRunning));
    bridge.start().unwrap();
    assert_eq!(bridge.start(), Err(BridgeError::AlreadyStarted));
    bridge.stop().await.unwrap();

    hub.stop().await.unwrap();
}

// ============================================================================
// Re-subscription backoff
// ============================================================================

/// Accepts every subscription and ends the stream straight away.
#[derive(Default)]
struct ClosingBus {
    subscribed_at: Mutex<Vec<tokio::time::Instant>>,
}

impl EventBus for ClosingBus {
    fn publish(
        &self,
        _topic: &str,
        _envelope: &BusEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn subscribe(
        &self,
        _topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        self.subscribed_at.lock().unwrap().push(tokio::time::Instant::now());
        Box::pin(async { Ok(Box::pin(futures::stream::empty()) as EventStream) })
    }
}

#[tokio::test]
async fn streams_that_end_immediately_still_back_off() {
    let bus = Arc::new(ClosingBus::default());
    let hub = Hub::new(HubConfig::default());
    hub.start().unwrap();

    let config = BridgeConfig::default().with_topic(TOPIC).with_retry(
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(20))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(1))
            .build(),
    );
    let bridge = BusBridge::new(Arc::clone(&bus) as Arc<dyn EventBus>, hub.handle(), config);
    bridge.start().unwrap();

    // Growing delays fit about 5 attempts in this window; the floor alone
    // would allow about 20
    tokio::time::sleep(Duration::from_millis(400)).await;
    bridge.stop().await.unwrap();

    let attempts = bus.subscribed_at.lock().unwrap().clone();
    assert!(attempts.len() >= 3, "bridge stopped re-subscribing: {}", attempts.len());
    assert!(attempts.len() <= 7, "bridge retried at the floor: {}", attempts.len());

    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps.last().unwrap() > gaps.first().unwrap());

    hub.stop().await.unwrap();
}
