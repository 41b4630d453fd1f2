//! Injected dependencies shared by log implementations.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// Event logs stamp `created_at` through a clock so tests can force timestamp
/// collisions and exercise the cursor tie-break.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
