//! Outbound JSON shapes.
//!
//! Payloads are embedded verbatim as raw JSON; nothing here parses them into a
//! value tree. A payload that is not valid JSON (a producer bug) is sent as a
//! JSON string instead of dropping the event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::value::RawValue;
use ticket_events_core::event::{Event, EventId, EventType, Payload, TicketId};

/// Payload as it goes on the wire.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PayloadJson<'a> {
    /// Valid JSON, embedded as-is.
    Raw(&'a RawValue),
    /// Not JSON; sent as a string.
    Text(&'a str),
}

impl<'a> PayloadJson<'a> {
    /// Borrow a payload for serialization.
    #[must_use]
    pub fn new(payload: &'a Payload, event_id: EventId) -> Self {
        match payload.as_raw_json() {
            Ok(raw) => Self::Raw(raw),
            Err(e) => {
                tracing::warn!(event_id = %event_id, error = %e, "Event payload is not JSON; sending as string");
                Self::Text(payload.as_str())
            },
        }
    }
}

/// SSE `data` for one event: `{id, type, payload}`.
#[derive(Debug, Serialize)]
pub struct StreamEventData<'a> {
    /// Event id, also the SSE `id` field.
    pub id: EventId,
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: &'a EventType,
    /// Event payload.
    pub payload: PayloadJson<'a>,
}

impl<'a> StreamEventData<'a> {
    /// Borrow an event.
    #[must_use]
    pub fn new(event: &'a Event) -> Self {
        Self {
            id: event.id,
            event_type: &event.event_type,
            payload: PayloadJson::new(&event.payload, event.id),
        }
    }
}

/// WebSocket text frame: `{"type": ..., "data": {id, ticket_id, payload, created_at}}`.
#[derive(Debug, Serialize)]
pub struct SocketEventFrame<'a> {
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: &'a EventType,
    /// Event body.
    pub data: SocketEventData<'a>,
}

/// Body of a [`SocketEventFrame`].
#[derive(Debug, Serialize)]
pub struct SocketEventData<'a> {
    /// Event id.
    pub id: EventId,
    /// Ticket the event is about.
    pub ticket_id: &'a TicketId,
    /// Event payload.
    pub payload: PayloadJson<'a>,
    /// When the log accepted the event.
    pub created_at: DateTime<Utc>,
}

impl<'a> SocketEventFrame<'a> {
    /// Borrow an event.
    #[must_use]
    pub fn new(event: &'a Event) -> Self {
        Self {
            event_type: &event.event_type,
            data: SocketEventData {
                id: event.id,
                ticket_id: &event.ticket_id,
                payload: PayloadJson::new(&event.payload, event.id),
                created_at: event.created_at,
            },
        }
    }
}
