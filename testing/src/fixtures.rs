//! Event builders with explicit timestamps and ids.
//!
//! Ids built from small integers sort in integer order, which makes tie-break
//! scenarios easy to read in tests.

#![allow(clippy::expect_used)] // Fixture inputs are test constants

use chrono::{DateTime, TimeZone, Utc};
use ticket_events_core::event::{Event, EventId, EventType, Payload, TicketId};
use uuid::Uuid;

/// `secs` seconds after the Unix epoch.
///
/// # Panics
///
/// Panics if `secs` is outside chrono's representable range.
#[must_use]
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .expect("fixture timestamp should be in range")
}

/// Event id whose UUID is the integer `n`.
#[must_use]
pub const fn id(n: u128) -> EventId {
    EventId::from_uuid(Uuid::from_u128(n))
}

/// Event on ticket `T-1` created `secs` after the epoch with id `n`.
///
/// # Panics
///
/// Panics if `secs` is outside chrono's representable range.
#[must_use]
pub fn event_at(secs: i64, n: u128, event_type: EventType) -> Event {
    Event {
        id: id(n),
        ticket_id: TicketId::new("T-1"),
        event_type,
        payload: Payload::new(format!(r#"{{"seq":{n}}}"#)),
        created_at: at(secs),
    }
}
