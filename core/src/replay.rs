//! Cursor replay engine.
//!
//! Given a resume point, the engine returns the events strictly after it in
//! `(created_at ASC, id ASC)` order, together with the cursor to pass to the
//! next call. Chained calls never skip or repeat an event, including when
//! several events share a timestamp:
//!
//! ```text
//! log:     E1(t=100,a)  E2(t=100,b)  E3(t=150,c)
//! replay((100,a)) -> [E2, E3], cursor (150,c)
//! replay((150,c)) -> [],       cursor (150,c)   // unchanged
//! ```
//!
//! The engine also turns a client-supplied resume id into a cursor
//! ([`ReplayEngine::resolve`]), applying the configured policy when the id is
//! missing or no longer in the log.

use crate::event::{Cursor, Event, EventId};
use crate::event_log::{EventLog, EventLogError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Default number of events loaded per replay call.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Where a client without a resume id starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// Replay the whole log.
    Beginning,
    /// Only events appended after the client connected.
    #[default]
    Now,
}

/// What to do when a client's resume id is not in the log.
///
/// This happens after history was truncated, or when a client sends an id it
/// never received from us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownResumePolicy {
    /// Replay from the very beginning of the log.
    ReplayAll,
    /// Continue from the log head as if the client were new.
    SkipToNow,
    /// Continue from the log head and tell the client to refetch its state.
    #[default]
    Resync,
}

/// Error returned when a policy name in configuration is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind}: {value}")]
pub struct InvalidPolicy {
    kind: &'static str,
    value: String,
}

impl FromStr for StartPosition {
    type Err = InvalidPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginning" => Ok(Self::Beginning),
            "now" => Ok(Self::Now),
            other => Err(InvalidPolicy {
                kind: "start position",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for UnknownResumePolicy {
    type Err = InvalidPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replay_all" => Ok(Self::ReplayAll),
            "skip_to_now" => Ok(Self::SkipToNow),
            "resync" => Ok(Self::Resync),
            other => Err(InvalidPolicy {
                kind: "unknown resume policy",
                value: other.to_string(),
            }),
        }
    }
}

/// How a resume request was turned into a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// The resume id was found; replay continues right after it.
    Resumed,
    /// No resume id was supplied; the start position applied.
    Fresh,
    /// Unknown resume id, replaying from the beginning.
    ReplayAll,
    /// Unknown resume id, continuing from the log head.
    SkippedToNow,
    /// Unknown resume id, continuing from the log head; the client must
    /// refetch authoritative state.
    Resync,
}

impl fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resumed => "resumed",
            Self::Fresh => "fresh",
            Self::ReplayAll => "replay_all",
            Self::SkippedToNow => "skipped_to_now",
            Self::Resync => "resync",
        };
        f.write_str(name)
    }
}

/// Result of [`ReplayEngine::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Cursor to start replaying from.
    pub cursor: Cursor,
    /// How it was chosen.
    pub kind: ResolutionKind,
}

/// One page of replayed events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    /// Events after the input cursor, oldest first.
    pub events: Vec<Event>,
    /// Cursor of the last event in `events`, or the input cursor if empty.
    pub cursor: Cursor,
    /// False when the page was full and more events may be waiting.
    pub exhausted: bool,
}

/// Computes ordered backlogs from the event log.
///
/// Cheap to clone; every streaming session holds its own handle.
#[derive(Clone)]
pub struct ReplayEngine {
    log: Arc<dyn EventLog>,
    page_size: usize,
}

impl ReplayEngine {
    /// Create an engine over `log` with the default page size.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the maximum number of events returned per call (at least 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The configured page size.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Load the next page of events after `cursor`.
    ///
    /// # Errors
    ///
    /// Propagates the log error; callers polling on a timer treat it as
    /// transient and retry on their next tick with the same cursor.
    pub async fn replay(&self, cursor: Cursor) -> Result<Replay, EventLogError> {
        let mut events = self.log.query_after(cursor, self.page_size).await?;
        let loaded = events.len();

        // The log contract already guarantees this; a misbehaving store must
        // not be able to move a consumer backwards.
        events.retain(|event| cursor.precedes(event));
        if events.len() != loaded {
            tracing::warn!(
                %cursor,
                dropped = loaded - events.len(),
                "Event log returned events at or before the cursor"
            );
        }

        let next = events.last().map_or(cursor, Event::cursor);
        Ok(Replay {
            exhausted: loaded < self.page_size,
            events,
            cursor: next,
        })
    }

    /// Cursor of the newest event, or the beginning for an empty log.
    ///
    /// # Errors
    ///
    /// Propagates the log error.
    pub async fn head(&self) -> Result<Cursor, EventLogError> {
        Ok(self.log.latest().await?.unwrap_or_else(Cursor::beginning))
    }

    /// Turn a client-supplied resume id into a starting cursor.
    ///
    /// `resume` is the raw value the client sent (header or query parameter).
    /// A value that does not parse as an event id is handled like an id that
    /// is not in the log.
    ///
    /// # Errors
    ///
    /// Propagates log errors from the lookup.
    pub async fn resolve(
        &self,
        resume: Option<&str>,
        start: StartPosition,
        unknown: UnknownResumePolicy,
    ) -> Result<Resolution, EventLogError> {
        let Some(raw) = resume.map(str::trim).filter(|raw| !raw.is_empty()) else {
            let cursor = match start {
                StartPosition::Beginning => Cursor::beginning(),
                StartPosition::Now => self.head().await?,
            };
            return Ok(Resolution {
                cursor,
                kind: ResolutionKind::Fresh,
            });
        };

        if let Ok(id) = raw.parse::<EventId>() {
            if let Some(created_at) = self.log.lookup_created_at(id).await? {
                return Ok(Resolution {
                    cursor: Cursor::new(created_at, id),
                    kind: ResolutionKind::Resumed,
                });
            }
        }

        tracing::info!(resume_id = raw, policy = ?unknown, "Resume id not found in event log");

        let resolution = match unknown {
            UnknownResumePolicy::ReplayAll => Resolution {
                cursor: Cursor::beginning(),
                kind: ResolutionKind::ReplayAll,
            },
            UnknownResumePolicy::SkipToNow => Resolution {
                cursor: self.head().await?,
                kind: ResolutionKind::SkippedToNow,
            },
            UnknownResumePolicy::Resync => Resolution {
                cursor: self.head().await?,
                kind: ResolutionKind::Resync,
            },
        };
        Ok(resolution)
    }
}

impl fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
