//! # Ticket Events Core
//!
//! Data model and abstractions for delivering ticket-state notifications to
//! connected clients.
//!
//! ## Core Concepts
//!
//! - **Event**: immutable record of one ticket state change ([`event::Event`])
//! - **Cursor**: a `(created_at, id)` position; the last event a consumer saw
//! - **Event log**: durable, append-only source of truth ([`event_log::EventLog`])
//! - **Event bus**: best-effort cross-process fan-out ([`event_bus::EventBus`])
//! - **Replay engine**: ordered, gap-free backlog after a cursor
//!   ([`replay::ReplayEngine`])
//! - **Reconnection contract**: what clients do between connections
//!   ([`reconnect::ReconnectState`])
//!
//! ## Ordering
//!
//! Everything in this workspace agrees on one order, `(created_at ASC, id ASC)`.
//! Replay, polling and hub fan-out all preserve it, so the frames on any single
//! connection never go backwards.

pub mod access;
pub mod environment;
pub mod event;
pub mod event_bus;
pub mod event_log;
pub mod reconnect;
pub mod replay;

// Re-export commonly used types
pub use access::{Permissions, Principal, Role};
pub use chrono::{DateTime, Utc};
pub use event::{Cursor, Event, EventId, EventType, Payload, TicketId};
pub use event_bus::{BusEnvelope, EventBus, EventBusError, NodeId};
pub use event_log::{EventLog, EventLogError};
pub use replay::{ReplayEngine, StartPosition, UnknownResumePolicy};
