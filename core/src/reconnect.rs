//! Client reconnection contract.
//!
//! Clients of the streaming endpoints are expected to:
//!
//! 1. Remember the id of the last event they finished processing and present
//!    it when reconnecting, so the server can close the gap by replay.
//! 2. Never reconnect immediately after a transport error. Wait a floor
//!    interval, grow the wait monotonically up to a ceiling, and only reset to
//!    the floor after a successful reconnection.
//! 3. Treat events as invalidation triggers for refetching authoritative state,
//!    and fall back to interval polling of a bulk endpoint while disconnected.
//!
//! [`ReconnectState`] is that contract as a state machine. It performs no I/O,
//! so any client (native, wasm, test harness) can drive it.
//!
//! # Example
//!
//! ```
//! use ticket_events_core::reconnect::{Backoff, ReconnectState};
//! use std::time::Duration;
//!
//! let mut state = ReconnectState::new(Backoff::new(Duration::from_secs(1), Duration::from_secs(8)));
//!
//! assert_eq!(state.on_transport_error(), Duration::from_secs(1));
//! assert_eq!(state.on_transport_error(), Duration::from_secs(2));
//! assert!(state.status().is_disconnected());
//!
//! state.on_connected();
//! assert_eq!(state.on_transport_error(), Duration::from_secs(1));
//! ```

use crate::event::EventId;
use std::time::Duration;

/// Default first delay after a transport error.
pub const DEFAULT_FLOOR: Duration = Duration::from_secs(1);

/// Default upper bound for the delay.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(30);

/// Bounded exponential backoff.
///
/// Delays start at `floor`, are multiplied after every failure, and never
/// exceed `ceiling`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    multiplier: u32,
    next: Duration,
}

impl Backoff {
    /// Create a doubling backoff between `floor` and `ceiling`.
    ///
    /// A ceiling below the floor is raised to the floor.
    #[must_use]
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            multiplier: 2,
            next: floor,
        }
    }

    /// Set the growth factor (at least 1).
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Delay to wait now; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay
            .checked_mul(self.multiplier)
            .map_or(self.ceiling, |grown| grown.min(self.ceiling));
        delay
    }

    /// Go back to the floor.
    pub const fn reset(&mut self) {
        self.next = self.floor;
    }

    /// The delay [`next_delay`](Self::next_delay) would return.
    #[must_use]
    pub const fn peek(&self) -> Duration {
        self.next
    }

    /// Lower bound.
    #[must_use]
    pub const fn floor(&self) -> Duration {
        self.floor
    }

    /// Upper bound.
    #[must_use]
    pub const fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_FLOOR, DEFAULT_CEILING)
    }
}

/// Connectivity as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never connected yet.
    Connecting,
    /// Streaming.
    Live,
    /// Transport failed; the client polls the bulk endpoint until streaming
    /// resumes.
    Disconnected {
        /// Consecutive failed attempts.
        failures: u32,
    },
}

impl ConnectionStatus {
    /// Whether the client should be polling the bulk endpoint.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

/// What the client must do after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    /// Refetch the ticket(s) the event refers to.
    Invalidate,
    /// The server could not resume; refetch everything.
    RefetchAll,
}

/// Client-side reconnection state.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    last_processed: Option<EventId>,
    status: ConnectionStatus,
    backoff: Backoff,
}

impl ReconnectState {
    /// Fresh state with no resume point.
    #[must_use]
    pub const fn new(backoff: Backoff) -> Self {
        Self {
            last_processed: None,
            status: ConnectionStatus::Connecting,
            backoff,
        }
    }

    /// Start from a resume point persisted by a previous run.
    #[must_use]
    pub const fn resuming_from(mut self, id: EventId) -> Self {
        self.last_processed = Some(id);
        self
    }

    /// Id to present on (re)connect, if any.
    #[must_use]
    pub const fn resume_id(&self) -> Option<EventId> {
        self.last_processed
    }

    /// Current connectivity.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// The stream was (re)established. Resets the backoff to its floor.
    pub const fn on_connected(&mut self) {
        self.status = ConnectionStatus::Live;
        self.backoff.reset();
    }

    /// An event was fully processed; it becomes the resume point.
    pub const fn on_event(&mut self, id: EventId) -> ClientAction {
        self.last_processed = Some(id);
        ClientAction::Invalidate
    }

    /// The server signalled that the resume point is gone.
    ///
    /// The server has moved the stream to its head; `head` (the id carried by
    /// the resync frame, `None` on an empty log) replaces the stale resume
    /// point so the next reconnect does not trigger another resync.
    pub const fn on_resync(&mut self, head: Option<EventId>) -> ClientAction {
        self.last_processed = head;
        ClientAction::RefetchAll
    }

    /// The transport failed. Returns how long to wait before reconnecting.
    pub fn on_transport_error(&mut self) -> Duration {
        let failures = match self.status {
            ConnectionStatus::Disconnected { failures } => failures.saturating_add(1),
            ConnectionStatus::Connecting | ConnectionStatus::Live => 1,
        };
        self.status = ConnectionStatus::Disconnected { failures };
        self.backoff.next_delay()
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn backoff_is_monotonic_with_custom_multiplier() {
        let mut backoff =
            Backoff::new(Duration::from_secs(1), Duration::from_secs(60)).with_multiplier(3);
        let mut previous = Duration::ZERO;
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
        }
    }

    #[test]
    fn ceiling_below_floor_is_clamped() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.ceiling(), Duration::from_secs(5));
    }

    #[test]
    fn backoff_resets_only_on_connect() {
        let mut state = ReconnectState::default();
        state.on_transport_error();
        state.on_transport_error();
        let third = state.on_transport_error();
        assert_eq!(third, Duration::from_secs(4));
        assert_eq!(state.status(), ConnectionStatus::Disconnected { failures: 3 });

        // Receiving nothing does not reset; only a successful connect does.
        assert_eq!(state.on_transport_error(), Duration::from_secs(8));

        state.on_connected();
        assert_eq!(state.status(), ConnectionStatus::Live);
        assert_eq!(state.on_transport_error(), DEFAULT_FLOOR);
    }

    #[test]
    fn tracks_last_processed_event() {
        let mut state = ReconnectState::default();
        assert_eq!(state.resume_id(), None);

        let first = EventId::new();
        let second = EventId::new();
        assert_eq!(state.on_event(first), ClientAction::Invalidate);
        state.on_event(second);
        assert_eq!(state.resume_id(), Some(second));

        // A transport error keeps the resume point for the next connect.
        state.on_transport_error();
        assert_eq!(state.resume_id(), Some(second));
    }

    #[test]
    fn resync_replaces_resume_point_with_head() {
        let head = EventId::new();
        let mut state = ReconnectState::default().resuming_from(EventId::new());
        assert_eq!(state.on_resync(Some(head)), ClientAction::RefetchAll);
        assert_eq!(state.resume_id(), Some(head));
    }

    #[test]
    fn resync_on_empty_log_drops_resume_point() {
        let mut state = ReconnectState::default().resuming_from(EventId::new());
        assert_eq!(state.on_resync(None), ClientAction::RefetchAll);
        assert_eq!(state.resume_id(), None);
    }
}
