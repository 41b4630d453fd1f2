//! Event log trait: the durable, append-only source of ticket events.
//!
//! The log is owned by an external store. This workspace relies on exactly
//! three properties of it:
//!
//! - Records are appended and never updated or deleted
//! - Insertion order correlates with increasing `created_at`
//! - `(created_at, id)` totally orders any two records, even when timestamps
//!   collide
//!
//! # Implementations
//!
//! - `PostgresEventLog` (in `ticket-events-postgres`): Production implementation
//! - `InMemoryEventLog` (in `ticket-events-testing`): Fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use ticket_events_core::event::{Cursor, EventType, Payload, TicketId};
//! use ticket_events_core::event_log::{EventLog, EventLogError};
//!
//! async fn example<L: EventLog>(log: &L) -> Result<(), EventLogError> {
//!     let stored = log
//!         .append(TicketId::new("T-42"), EventType::TicketCreated, Payload::default())
//!         .await?;
//!
//!     // Everything after the beginning, oldest first
//!     let events = log.query_after(Cursor::beginning(), 100).await?;
//!     assert_eq!(events.last().map(|e| e.id), Some(stored.id));
//!     Ok(())
//! }
//! ```

use crate::event::{Cursor, Event, EventId, EventType, Payload, TicketId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event log operations.
#[derive(Error, Debug, Clone)]
pub enum EventLogError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored record could not be decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The log is temporarily unavailable (maintenance, failover...).
    #[error("Event log unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by [`EventLog`] methods.
pub type LogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventLogError>> + Send + 'a>>;

/// Append-only event log abstraction.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: any number of streaming sessions read
/// the log concurrently, without exclusive locking.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn EventLog>` between sessions, the notifier and
/// HTTP handlers.
pub trait EventLog: Send + Sync {
    /// Append a new event and return it as stored.
    ///
    /// The log assigns `id` and `created_at`. Callers treat this as
    /// fire-and-forget: a failure is logged by the caller and never retried by
    /// the notification core.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the insert failed
    fn append(
        &self,
        ticket_id: TicketId,
        event_type: EventType,
        payload: Payload,
    ) -> LogFuture<'_, Event>;

    /// Load up to `limit` events strictly after `cursor`.
    ///
    /// Events are ordered by `(created_at ASC, id ASC)`. A beginning cursor
    /// loads from the start of the log.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the query failed
    /// - `SerializationError`: a row could not be decoded
    fn query_after(&self, cursor: Cursor, limit: usize) -> LogFuture<'_, Vec<Event>>;

    /// Resolve an event id into its timestamp.
    ///
    /// Returns `None` when the id is not (or no longer) in the log.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the query failed
    fn lookup_created_at(&self, id: EventId) -> LogFuture<'_, Option<DateTime<Utc>>>;

    /// Position of the newest event, or `None` for an empty log.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the query failed
    fn latest(&self) -> LogFuture<'_, Option<Cursor>>;
}
