//! # Ticket Events Testing
//!
//! Testing utilities for the ticket notification core.
//!
//! This crate provides:
//! - [`InMemoryEventLog`]: append-only log with a controllable clock, history
//!   truncation and read-failure injection
//! - [`InMemoryEventBus`]: topic fan-out shared between simulated processes,
//!   with an outage switch
//! - [`mocks::ManualClock`]: deterministic time, for forcing timestamp collisions
//! - [`fixtures`]: event builders with explicit timestamps and ids
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use ticket_events_core::event::{EventType, Payload, TicketId};
//! use ticket_events_core::event_log::EventLog;
//! use ticket_events_testing::{InMemoryEventLog, mocks::ManualClock, test_clock};
//!
//! # tokio_test::block_on(async {
//! let clock = Arc::new(test_clock());
//! let log = InMemoryEventLog::with_clock(clock.clone());
//!
//! // Same instant: the two events collide on created_at
//! let a = log.append(TicketId::new("T-1"), EventType::TicketCreated, Payload::default()).await.unwrap();
//! let b = log.append(TicketId::new("T-1"), EventType::TicketUpdated, Payload::default()).await.unwrap();
//! assert_eq!(a.created_at, b.created_at);
//! assert!(a.id < b.id);
//! # });
//! ```

pub mod event_bus;
pub mod event_log;
pub mod fixtures;

/// Mock implementations of environment traits.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use std::sync::{Mutex, PoisonError};
    use ticket_events_core::environment::Clock;

    /// Clock that only moves when told to.
    ///
    /// # Example
    ///
    /// ```
    /// use ticket_events_testing::mocks::ManualClock;
    /// use ticket_events_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let t0 = clock.now();
    /// assert_eq!(clock.now(), t0);
    ///
    /// clock.advance(Duration::seconds(5));
    /// assert_eq!(clock.now() - t0, Duration::seconds(5));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default manual clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> ManualClock {
        ManualClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use event_bus::InMemoryEventBus;
pub use event_log::InMemoryEventLog;
pub use mocks::{ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_events_core::environment::Clock;

    #[test]
    fn manual_clock_is_frozen() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }
}
