//! In-memory event log for fast, deterministic tests.
//!
//! Events are kept sorted by `(created_at, id)`. Timestamps come from an
//! injectable [`Clock`], so tests can freeze time and force collisions, and
//! reads can be made to fail to exercise recovery paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use ticket_events_core::environment::{Clock, SystemClock};
use ticket_events_core::event::{Cursor, Event, EventId, EventType, Payload, TicketId};
use ticket_events_core::event_log::{EventLog, EventLogError, LogFuture};

/// In-memory [`EventLog`].
///
/// Cloning shares the underlying storage.
///
/// # Example
///
/// ```
/// use ticket_events_core::event::{Cursor, EventType, Payload, TicketId};
/// use ticket_events_core::event_log::EventLog;
/// use ticket_events_testing::InMemoryEventLog;
///
/// # tokio_test::block_on(async {
/// let log = InMemoryEventLog::new();
/// log.append(TicketId::new("T-1"), EventType::TicketCreated, Payload::default()).await.unwrap();
///
/// log.fail_reads(true);
/// assert!(log.query_after(Cursor::beginning(), 10).await.is_err());
///
/// log.fail_reads(false);
/// assert_eq!(log.query_after(Cursor::beginning(), 10).await.unwrap().len(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryEventLog {
    events: Arc<RwLock<Vec<Event>>>,
    clock: Arc<dyn Clock>,
    fail_reads: Arc<AtomicBool>,
    failing_reads: Arc<AtomicUsize>,
    fail_appends: Arc<AtomicBool>,
    queries: Arc<AtomicUsize>,
}

impl InMemoryEventLog {
    /// Create an empty log stamped by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty log stamped by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            clock,
            fail_reads: Arc::new(AtomicBool::new(false)),
            failing_reads: Arc::new(AtomicUsize::new(0)),
            fail_appends: Arc::new(AtomicBool::new(false)),
            queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Insert a fully-formed event, keeping the log sorted.
    ///
    /// Bypasses the clock; useful for fixtures with hand-picked timestamps
    /// and ids.
    pub fn insert(&self, event: Event) {
        let mut events = self.events.write().unwrap();
        let at = events.partition_point(|e| e.cursor() < event.cursor());
        events.insert(at, event);
    }

    /// Drop every event created strictly before `at`, as retention would.
    pub fn truncate_before(&self, at: DateTime<Utc>) {
        self.events.write().unwrap().retain(|e| e.created_at >= at);
    }

    /// Make every read fail (or stop failing).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` reads fail, then recover.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Make appends fail (or stop failing).
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every stored event, in cursor order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.read().unwrap().clone()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }

    /// Number of `query_after` calls served so far, failed ones included.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> Result<(), EventLogError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EventLogError::Unavailable("reads disabled".to_string()));
        }
        let consumed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(EventLogError::DatabaseError("injected read failure".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventLog")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(
        &self,
        ticket_id: TicketId,
        event_type: EventType,
        payload: Payload,
    ) -> LogFuture<'_, Event> {
        Box::pin(async move {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(EventLogError::DatabaseError("appends disabled".to_string()));
            }

            let mut events = self.events.write().unwrap();
            let now = self.clock.now();
            // created_at never goes backwards, even if the clock does
            let created_at = events.last().map_or(now, |last| last.created_at.max(now));
            let event = Event {
                id: EventId::new(),
                ticket_id,
                event_type,
                payload,
                created_at,
            };
            let at = events.partition_point(|e| e.cursor() < event.cursor());
            events.insert(at, event.clone());
            Ok(event)
        })
    }

    fn query_after(&self, cursor: Cursor, limit: usize) -> LogFuture<'_, Vec<Event>> {
        Box::pin(async move {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.check_read()?;

            let events = self.events.read().unwrap();
            let start = events.partition_point(|e| e.cursor() <= cursor);
            Ok(events[start..].iter().take(limit).cloned().collect())
        })
    }

    fn lookup_created_at(&self, id: EventId) -> LogFuture<'_, Option<DateTime<Utc>>> {
        Box::pin(async move {
            self.check_read()?;
            Ok(self
                .events
                .read()
                .unwrap()
                .iter()
                .find(|e| e.id == id)
                .map(|e| e.created_at))
        })
    }

    fn latest(&self) -> LogFuture<'_, Option<Cursor>> {
        Box::pin(async move {
            self.check_read()?;
            Ok(self.events.read().unwrap().last().map(Event::cursor))
        })
    }
}
