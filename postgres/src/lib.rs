//! `PostgreSQL` event log for ticket notifications.
//!
//! This crate provides the production implementation of the `EventLog` trait
//! from `ticket-events-core`, on top of sqlx:
//!
//! - Append-only `ticket_events` table, keyed by UUID v7 ids
//! - Cursor queries ordered by `(created_at, id)` and served by a composite
//!   index
//! - Embedded migrations ([`MIGRATOR`])
//!
//! # Example
//!
//! ```no_run
//! use ticket_events_postgres::PostgresEventLog;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = PostgresEventLog::connect("postgres://localhost/tickets", 10).await?;
//!     log.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod event_log;

pub use event_log::PostgresEventLog;

/// Schema migrations for the event log.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
