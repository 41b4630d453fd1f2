//! Ticket events and the cursor order used to replay them.
//!
//! An [`Event`] is an immutable record of one ticket state change. Events are
//! appended to the event log and never updated or deleted. Every consumer in
//! this workspace (replay engine, streaming sessions, the hub) relies on a
//! single total order over events:
//!
//! ```text
//! (created_at ASC, id ASC)
//! ```
//!
//! `created_at` is non-decreasing in append order but not unique, so the event
//! id breaks ties. A [`Cursor`] is a position in that order ("the last event I
//! saw"), and an event is *after* a cursor iff its own position compares
//! greater.
//!
//! # Example
//!
//! ```
//! use ticket_events_core::event::{Cursor, Event, EventId, EventType, Payload, TicketId};
//! use chrono::{TimeZone, Utc};
//!
//! let at = Utc.timestamp_opt(100, 0).unwrap();
//! let event = Event {
//!     id: EventId::new(),
//!     ticket_id: TicketId::new("T-1"),
//!     event_type: EventType::TicketCreated,
//!     payload: Payload::new(r#"{"subject":"printer on fire"}"#),
//!     created_at: at,
//! };
//!
//! assert!(Cursor::beginning().precedes(&event));
//! assert!(!event.cursor().precedes(&event));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of an event.
///
/// Ids are UUID v7 values minted at append time, so within one process their
/// order agrees with append order. Ordering between ids is only ever used as
/// the tie-break for events sharing a `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Mint a new time-ordered event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The nil id, used by the beginning-of-log cursor.
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Wrap an existing UUID (e.g. a row read back from the database).
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Identifier of the ticket an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Create a ticket id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of ticket state change.
///
/// The wire and storage form is the `snake_case` name returned by
/// [`EventType::as_str`]. Names this build does not know are kept verbatim in
/// [`EventType::Other`] so replay never fails on newer producers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// A ticket was opened.
    TicketCreated,
    /// Ticket fields (subject, priority, tags...) changed.
    TicketUpdated,
    /// Ticket status moved (open, pending, solved...).
    StatusChanged,
    /// Ticket assignee changed.
    TicketAssigned,
    /// A public comment was added.
    CommentAdded,
    /// An agent-only note was added.
    InternalNoteAdded,
    /// A watcher was added to the ticket.
    WatcherAdd,
    /// A watcher was removed from the ticket.
    WatcherRemove,
    /// Ticket moved to another queue.
    QueueChanged,
    /// An attachment was uploaded.
    AttachmentAdded,
    /// An SLA target was missed.
    SlaBreached,
    /// A type name not known to this build.
    Other(String),
}

impl EventType {
    /// Storage and wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::TicketCreated => "ticket_created",
            Self::TicketUpdated => "ticket_updated",
            Self::StatusChanged => "status_changed",
            Self::TicketAssigned => "ticket_assigned",
            Self::CommentAdded => "comment_added",
            Self::InternalNoteAdded => "internal_note_added",
            Self::WatcherAdd => "watcher_add",
            Self::WatcherRemove => "watcher_remove",
            Self::QueueChanged => "queue_changed",
            Self::AttachmentAdded => "attachment_added",
            Self::SlaBreached => "sla_breached",
            Self::Other(name) => name,
        }
    }

    /// Whether only principals with internal access may receive this type.
    #[must_use]
    pub const fn is_restricted(&self) -> bool {
        matches!(
            self,
            Self::InternalNoteAdded
                | Self::WatcherAdd
                | Self::WatcherRemove
                | Self::QueueChanged
                | Self::SlaBreached
        )
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        match name {
            "ticket_created" => Self::TicketCreated,
            "ticket_updated" => Self::TicketUpdated,
            "status_changed" => Self::StatusChanged,
            "ticket_assigned" => Self::TicketAssigned,
            "comment_added" => Self::CommentAdded,
            "internal_note_added" => Self::InternalNoteAdded,
            "watcher_add" => Self::WatcherAdd,
            "watcher_remove" => Self::WatcherRemove,
            "queue_changed" => Self::QueueChanged,
            "attachment_added" => Self::AttachmentAdded,
            "sla_breached" => Self::SlaBreached,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, pre-serialized JSON payload.
///
/// Producers upstream are responsible for valid encoding. Nothing in the
/// notification path parses the document; transports embed it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(String);

impl Payload {
    /// Wrap an already-encoded JSON document.
    #[must_use]
    pub fn new(json: impl Into<String>) -> Self {
        Self(json.into())
    }

    /// Encode a JSON value as a payload.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Self {
        Self(value.to_string())
    }

    /// The encoded document.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Borrow the payload as raw JSON for embedding in an outbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer stored something that is not JSON.
    pub fn as_raw_json(&self) -> Result<&RawValue, serde_json::Error> {
        serde_json::from_str(&self.0)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self("{}".to_string())
    }
}

/// An immutable record of one ticket state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique, time-ordered id.
    pub id: EventId,
    /// Ticket this event is about.
    pub ticket_id: TicketId,
    /// Kind of change.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Opaque JSON document describing the change.
    pub payload: Payload,
    /// When the log accepted the event.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Position of this event in the replay order.
    #[must_use]
    pub const fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// A position in the `(created_at, id)` order: the last event a consumer saw.
///
/// The derived ordering compares `created_at` first and `id` second, matching
/// the order in which events are replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Timestamp of the last observed event.
    pub created_at: DateTime<Utc>,
    /// Id of the last observed event.
    pub id: EventId,
}

impl Cursor {
    /// Create a cursor from its parts.
    #[must_use]
    pub const fn new(created_at: DateTime<Utc>, id: EventId) -> Self {
        Self { created_at, id }
    }

    /// The cursor preceding every event ("replay from the beginning").
    #[must_use]
    pub const fn beginning() -> Self {
        Self {
            created_at: DateTime::<Utc>::MIN_UTC,
            id: EventId::nil(),
        }
    }

    /// Whether this is the beginning-of-log cursor.
    #[must_use]
    pub fn is_beginning(&self) -> bool {
        *self == Self::beginning()
    }

    /// Whether `event` comes strictly after this cursor.
    ///
    /// True iff `event.created_at > self.created_at`, or the timestamps are
    /// equal and the event id sorts after the cursor id. Same-timestamp
    /// siblings of the cursor event are therefore neither dropped nor
    /// delivered twice.
    #[must_use]
    pub fn precedes(&self, event: &Event) -> bool {
        event.cursor() > *self
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::beginning()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.created_at.to_rfc3339())
    }
}
