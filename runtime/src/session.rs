//! Streaming session: one long-lived server-to-client event stream.
//!
//! ```text
//! INIT ──resolve──► REPLAYING ──backlog drained──► IDLE-POLL ──► CLOSED
//!                                                   │  ▲
//!                                          poll tick │  │ new events
//!                                                   ▼  │
//!                                                  replay
//! ```
//!
//! [`StreamingSession::open`] is INIT: it turns the client's resume id into a
//! cursor, and is the only step that can fail. [`StreamingSession::run`]
//! drains the backlog, then polls the log on a fixed interval and emits
//! heartbeats on a longer one. It writes [`Frame`]s into a bounded channel;
//! the transport owns the receiving end, and dropping it ends the session.
//!
//! Log read failures after INIT are swallowed and retried on the next poll
//! tick with the same cursor. A failed write (client gone) ends the session
//! immediately.

use crate::metrics::SessionMetrics;
use crate::shutdown_signalled;
use std::time::Duration;
use thiserror::Error;
use ticket_events_core::access::Permissions;
use ticket_events_core::event::{Cursor, Event};
use ticket_events_core::event_log::EventLogError;
use ticket_events_core::replay::{
    DEFAULT_PAGE_SIZE, ReplayEngine, ResolutionKind, StartPosition, UnknownResumePolicy,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

/// Default interval between log polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Floor for both timer intervals; a zero period cannot drive a timer.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Errors that prevent a session from starting.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// The resume point could not be resolved because the log is unreachable.
    #[error("Failed to resolve resume point: {0}")]
    Resolve(#[from] EventLogError),
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How often to poll the log once the backlog is drained.
    pub poll_interval: Duration,
    /// How often to emit a heartbeat frame.
    pub heartbeat_interval: Duration,
    /// Where a client without a resume id starts.
    pub start_position: StartPosition,
    /// What to do with a resume id the log does not know.
    pub unknown_resume: UnknownResumePolicy,
    /// Maximum events loaded per log query.
    pub page_size: usize,
}

impl SessionConfig {
    /// Set the poll interval (at least [`MIN_INTERVAL`]).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set the heartbeat interval (at least [`MIN_INTERVAL`]).
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set the start position for clients without a resume id.
    #[must_use]
    pub const fn with_start_position(mut self, start: StartPosition) -> Self {
        self.start_position = start;
        self
    }

    /// Set the unknown resume id policy.
    #[must_use]
    pub const fn with_unknown_resume(mut self, policy: UnknownResumePolicy) -> Self {
        self.unknown_resume = policy;
        self
    }

    /// Set the page size (at least 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            start_position: StartPosition::default(),
            unknown_resume: UnknownResumePolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One unit written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A ticket event. Its id is the client's new resume point.
    Event(Event),
    /// Keep-alive; carries nothing.
    Heartbeat,
    /// The resume point was unknown; refetch authoritative state. Carries the
    /// cursor streaming continues from, so the client can resume past it.
    Resync(Cursor),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The server is shutting down.
    Shutdown,
    /// The client went away (frame channel closed).
    ClientGone,
}

/// Summary returned by [`StreamingSession::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    /// Why the session ended.
    pub outcome: SessionOutcome,
    /// Frames written, heartbeats included.
    pub frames: u64,
    /// Last cursor reached.
    pub cursor: Cursor,
}

/// A resolved session, ready to [`run`](Self::run).
#[derive(Debug)]
pub struct StreamingSession {
    engine: ReplayEngine,
    config: SessionConfig,
    permissions: Permissions,
    cursor: Cursor,
    resync: bool,
    frames: u64,
}

/// The client closed the frame channel.
struct ClientGone;

impl StreamingSession {
    /// Resolve the client's resume id (INIT).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Resolve`] if the log cannot be queried.
    pub async fn open(
        engine: ReplayEngine,
        config: SessionConfig,
        permissions: Permissions,
        resume: Option<&str>,
    ) -> Result<Self, SessionError> {
        let engine = engine.with_page_size(config.page_size);
        let resolution = engine
            .resolve(resume, config.start_position, config.unknown_resume)
            .await?;

        debug!(cursor = %resolution.cursor, kind = %resolution.kind, "Streaming session resolved");

        Ok(Self {
            engine,
            config,
            permissions,
            cursor: resolution.cursor,
            resync: resolution.kind == ResolutionKind::Resync,
            frames: 0,
        })
    }

    /// The current cursor.
    #[must_use]
    pub const fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Whether the session will start with a resync frame.
    #[must_use]
    pub const fn needs_resync(&self) -> bool {
        self.resync
    }

    /// Stream frames into `sink` until the client goes away or `shutdown`
    /// becomes `true`.
    pub async fn run(
        mut self,
        sink: mpsc::Sender<Frame>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionReport {
        let outcome = tokio::select! {
            biased;
            () = shutdown_signalled(&mut shutdown) => SessionOutcome::Shutdown,
            ClientGone = self.stream(&sink) => SessionOutcome::ClientGone,
        };

        info!(?outcome, frames = self.frames, cursor = %self.cursor, "Streaming session closed");
        SessionReport {
            outcome,
            frames: self.frames,
            cursor: self.cursor,
        }
    }

    async fn stream(&mut self, sink: &mpsc::Sender<Frame>) -> ClientGone {
        if self.resync {
            if let Err(gone) = self.write(sink, Frame::Resync(self.cursor)).await {
                return gone;
            }
            self.resync = false;
        }

        // REPLAYING
        if let Err(gone) = self.drain(sink).await {
            return gone;
        }

        // IDLE-POLL
        let start = Instant::now();
        // Fields are public, so the setters' floor may have been bypassed
        let poll_every = self.config.poll_interval.max(MIN_INTERVAL);
        let heartbeat_every = self.config.heartbeat_interval.max(MIN_INTERVAL);
        let mut poll = interval_at(start + poll_every, poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval_at(start + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let written = tokio::select! {
                () = sink.closed() => return ClientGone,
                _ = poll.tick() => self.drain(sink).await,
                _ = heartbeat.tick() => self.write(sink, Frame::Heartbeat).await,
            };
            if let Err(gone) = written {
                return gone;
            }
        }
    }

    /// Forward every event after the cursor, page by page. A log failure
    /// stops the drain quietly; the next poll tick picks up where it left off.
    async fn drain(&mut self, sink: &mpsc::Sender<Frame>) -> Result<(), ClientGone> {
        loop {
            let replay = match self.engine.replay(self.cursor).await {
                Ok(replay) => replay,
                Err(e) => {
                    warn!(error = %e, cursor = %self.cursor, "Event log query failed, retrying next tick");
                    SessionMetrics::record_poll_failure();
                    return Ok(());
                }
            };

            for event in replay.events {
                let cursor = event.cursor();
                if self.permissions.allows(&event.event_type) {
                    self.write(sink, Frame::Event(event)).await?;
                }
                self.cursor = cursor;
            }

            if replay.exhausted {
                return Ok(());
            }
        }
    }

    async fn write(&mut self, sink: &mpsc::Sender<Frame>, frame: Frame) -> Result<(), ClientGone> {
        sink.send(frame).await.map_err(|_| ClientGone)?;
        self.frames += 1;
        SessionMetrics::record_frame();
        Ok(())
    }
}
