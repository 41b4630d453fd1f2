//! Broadcast hub: in-process fan-out to live full-duplex connections.
//!
//! One dispatch loop owns the connection set. Every other task talks to it
//! through three bounded inputs:
//!
//! - **register**: add a connection to the live set
//! - **unregister**: remove it and close its outbound queue
//! - **broadcast**: enqueue an event on every live, authorized connection
//!
//! Delivery never waits on a client. Each connection has a bounded queue and
//! the loop only uses `try_send`; a connection whose queue is full is dropped
//! on the spot (the client reconnects and resumes by replay).
//!
//! # Example
//!
//! ```
//! use ticket_events_core::{Principal, Role};
//! use ticket_events_runtime::hub::{Hub, HubConfig};
//! # use ticket_events_core::event::*;
//!
//! # tokio_test::block_on(async {
//! let hub = Hub::new(HubConfig::default());
//! hub.start().unwrap();
//!
//! let handle = hub.handle();
//! let mut subscription = handle.connect(Principal::new("agent-7", Role::Agent)).await.unwrap();
//!
//! # let event = Event { id: EventId::new(), ticket_id: TicketId::new("T-1"),
//! #     event_type: EventType::TicketCreated, payload: Payload::default(),
//! #     created_at: chrono::Utc::now() };
//! handle.broadcast(event.clone()).await.unwrap();
//! assert_eq!(*subscription.recv().await.unwrap(), event);
//!
//! hub.stop().await.unwrap();
//! # });
//! ```

use crate::metrics::HubMetrics;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use ticket_events_core::access::{Permissions, Principal};
use ticket_events_core::event::Event;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default per-connection queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default capacity of each dispatch loop input.
pub const DEFAULT_INPUT_CAPACITY: usize = 1024;

/// Errors from hub lifecycle and input operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// `start` was called on a hub that was already started.
    #[error("Hub already started")]
    AlreadyStarted,

    /// The dispatch loop is not running (never started, or stopped).
    #[error("Hub is not running")]
    NotRunning,
}

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Capacity of each of the three dispatch loop inputs.
    pub input_capacity: usize,
}

impl HubConfig {
    /// Set the per-connection queue capacity (at least 1).
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the capacity of each dispatch loop input (at least 1).
    #[must_use]
    pub fn with_input_capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = capacity.max(1);
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            input_capacity: DEFAULT_INPUT_CAPACITY,
        }
    }
}

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Hub-side half of a connection: identity, permissions and the sending end
/// of its bounded outbound queue.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    principal: Principal,
    permissions: Permissions,
    outbound: mpsc::Sender<Arc<Event>>,
}

impl Connection {
    /// Create a connection with a queue of `capacity` events.
    ///
    /// Returns the connection (to hand to the hub) and the receiving end of
    /// its queue (for the transport writer).
    #[must_use]
    pub fn new(principal: Principal, capacity: usize) -> (Self, mpsc::Receiver<Arc<Event>>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let permissions = principal.permissions();
        (
            Self {
                id: ConnectionId::next(),
                principal,
                permissions,
                outbound,
            },
            receiver,
        )
    }

    /// The connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Who is connected.
    #[must_use]
    pub const fn principal(&self) -> &Principal {
        &self.principal
    }
}

/// Client-side half of a registered connection.
#[derive(Debug)]
pub struct Subscription {
    id: ConnectionId,
    receiver: mpsc::Receiver<Arc<Event>>,
}

impl Subscription {
    /// The connection id, for unregistering.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next event, or `None` once the hub closed the queue.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued.
    ///
    /// # Errors
    ///
    /// Returns the channel error when the queue is empty or closed.
    pub fn try_recv(&mut self) -> Result<Arc<Event>, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Read-only view of the dispatch loop, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    /// Whether the dispatch loop is running.
    pub running: bool,
    /// Ids of live connections.
    pub connections: BTreeSet<ConnectionId>,
}

/// Cloneable handle for feeding the dispatch loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register: mpsc::Sender<Connection>,
    unregister: mpsc::Sender<ConnectionId>,
    broadcast: mpsc::Sender<Event>,
    snapshot: watch::Receiver<HubSnapshot>,
    queue_capacity: usize,
}

impl HubHandle {
    /// Add a connection to the live set.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotRunning`] if the hub was never started or has
    /// stopped.
    pub async fn register(&self, connection: Connection) -> Result<(), HubError> {
        self.ensure_running()?;
        self.register
            .send(connection)
            .await
            .map_err(|_| HubError::NotRunning)
    }

    /// Create and register a connection for `principal` with the configured
    /// queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotRunning`] if the hub was never started or has
    /// stopped.
    pub async fn connect(&self, principal: Principal) -> Result<Subscription, HubError> {
        let (connection, receiver) = Connection::new(principal, self.queue_capacity);
        let id = connection.id();
        self.register(connection).await?;
        Ok(Subscription { id, receiver })
    }

    /// Remove a connection and close its queue. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotRunning`] if the hub was never started or has
    /// stopped.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubError> {
        self.ensure_running()?;
        self.unregister
            .send(id)
            .await
            .map_err(|_| HubError::NotRunning)
    }

    /// Fan `event` out to every live, authorized connection.
    ///
    /// Waits only for room in the dispatch loop's input, never for clients.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotRunning`] if the hub was never started or has
    /// stopped.
    pub async fn broadcast(&self, event: Event) -> Result<(), HubError> {
        self.ensure_running()?;
        self.broadcast
            .send(event)
            .await
            .map_err(|_| HubError::NotRunning)
    }

    /// Whether `id` is in the live set.
    #[must_use]
    pub fn is_live(&self, id: ConnectionId) -> bool {
        self.snapshot.borrow().connections.contains(&id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.snapshot.borrow().connections.len()
    }

    /// Whether the dispatch loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.snapshot.borrow().running
    }

    /// Subscribe to snapshot updates.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<HubSnapshot> {
        self.snapshot.clone()
    }

    // Inputs sent before `start` would sit in the channel buffer unseen
    fn ensure_running(&self) -> Result<(), HubError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(HubError::NotRunning)
        }
    }
}

struct Inputs {
    register: mpsc::Receiver<Connection>,
    unregister: mpsc::Receiver<ConnectionId>,
    broadcast: mpsc::Receiver<Event>,
    snapshot: watch::Sender<HubSnapshot>,
}

/// The broadcast hub.
///
/// Build one per process with [`Hub::new`], [`start`](Hub::start) it, and
/// pass [`HubHandle`]s to whatever accepts connections or emits events.
pub struct Hub {
    handle: HubHandle,
    inputs: Mutex<Option<Inputs>>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl Hub {
    /// Create an unstarted hub.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        let capacity = config.input_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(HubSnapshot::default());
        let (shutdown, _) = watch::channel(false);

        Self {
            handle: HubHandle {
                register: register_tx,
                unregister: unregister_tx,
                broadcast: broadcast_tx,
                snapshot: snapshot_rx,
                queue_capacity: config.queue_capacity.max(1),
            },
            inputs: Mutex::new(Some(Inputs {
                register: register_rx,
                unregister: unregister_rx,
                broadcast: broadcast_rx,
                snapshot: snapshot_tx,
            })),
            task: Mutex::new(None),
            shutdown,
        }
    }

    /// A handle to the dispatch loop.
    #[must_use]
    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Spawn the dispatch loop. A hub runs at most once.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyStarted`] on a second call, including after
    /// [`stop`](Self::stop).
    pub fn start(&self) -> Result<(), HubError> {
        let inputs = self
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(HubError::AlreadyStarted)?;

        inputs.snapshot.send_modify(|snapshot| snapshot.running = true);
        let task = tokio::spawn(dispatch(inputs, self.shutdown.subscribe()));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        info!("Broadcast hub started");
        Ok(())
    }

    /// Stop the dispatch loop and close every outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotRunning`] if the hub is not running.
    pub async fn stop(&self) -> Result<(), HubError> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(HubError::NotRunning)?;

        self.shutdown.send_replace(true);
        if let Err(e) = task.await {
            warn!(error = %e, "Hub dispatch loop ended abnormally");
        }

        info!("Broadcast hub stopped");
        Ok(())
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn dispatch(mut inputs: Inputs, mut shutdown: watch::Receiver<bool>) {
    let mut connections: HashMap<ConnectionId, Connection> = HashMap::new();

    loop {
        // Registrations win over broadcasts queued after them
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            Some(connection) = inputs.register.recv() => {
                let id = connection.id();
                if connections.contains_key(&id) {
                    warn!(connection_id = %id, "Connection already registered, ignoring");
                    continue;
                }
                debug!(connection_id = %id, principal = %connection.principal.id, "Connection registered");
                connections.insert(id, connection);
                publish(&inputs.snapshot, &connections);
            }

            Some(id) = inputs.unregister.recv() => {
                // Dropping the connection drops its sender, closing the queue
                if connections.remove(&id).is_some() {
                    debug!(connection_id = %id, "Connection unregistered");
                    publish(&inputs.snapshot, &connections);
                }
            }

            Some(event) = inputs.broadcast.recv() => {
                if deliver(&mut connections, event) {
                    publish(&inputs.snapshot, &connections);
                }
            }

            else => break,
        }
    }

    let closed = connections.len();
    connections.clear();
    inputs.snapshot.send_replace(HubSnapshot::default());
    HubMetrics::record_active(0);
    debug!(closed, "Hub dispatch loop exited");
}

/// Enqueue `event` on every authorized connection. Returns whether any
/// connection was dropped.
fn deliver(connections: &mut HashMap<ConnectionId, Connection>, event: Event) -> bool {
    let event = Arc::new(event);
    let mut delivered = 0;
    let mut dropped = Vec::new();

    for (id, connection) in connections.iter() {
        if !connection.permissions.allows(&event.event_type) {
            continue;
        }
        match connection.outbound.try_send(Arc::clone(&event)) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %id, event_id = %event.id, "Slow consumer, dropping connection");
                HubMetrics::record_dropped("overflow");
                dropped.push(*id);
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %id, "Connection queue closed, removing");
                HubMetrics::record_dropped("closed");
                dropped.push(*id);
            }
        }
    }

    HubMetrics::record_delivered(delivered);
    for id in &dropped {
        connections.remove(id);
    }
    !dropped.is_empty()
}

fn publish(snapshot: &watch::Sender<HubSnapshot>, connections: &HashMap<ConnectionId, Connection>) {
    HubMetrics::record_active(connections.len());
    snapshot.send_replace(HubSnapshot {
        running: true,
        connections: connections.keys().copied().collect(),
    });
}
