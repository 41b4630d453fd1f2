//! Server-Sent Events endpoint.
//!
//! ```text
//! GET /api/events/stream
//! Last-Event-ID: <id of the last event the client processed>   (optional)
//! ```
//!
//! Each request runs one [`StreamingSession`] on its own task. The session
//! replays everything after the resume point, then polls the log, so a client
//! that reconnects with its last id sees no gaps and no duplicates.
//!
//! **Frames:**
//! ```text
//! id: 0190c2d4-...
//! event: ticket
//! data: {"id":"0190c2d4-...","type":"status_changed","payload":{...}}
//!
//! : heartbeat
//!
//! event: resync
//! id: 0190c2d4-...
//! data: {}
//! ```
//!
//! A `resync` frame carries the id of the log head the session continues
//! from, so a reconnecting client presents a known id instead of repeating
//! the unknown one. On an empty log the id is blank, which clears the
//! browser's last event id.
//!
//! The response ends when the server shuts down; a client that goes away
//! ends its session.

use crate::error::AppError;
use crate::extractors::{AuthenticatedPrincipal, LastEventId};
use crate::state::AppState;
use crate::wire::StreamEventData;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use futures::Stream;
use std::convert::Infallible;
use ticket_events_runtime::{Frame, StreamingSession};
use tokio::sync::mpsc;
use tracing::{Instrument, info, warn};

/// SSE event name for ticket events.
pub const TICKET_EVENT: &str = "ticket";

/// SSE event name telling the client to refetch its state.
pub const RESYNC_EVENT: &str = "resync";

/// Frames buffered between the session task and the response body.
const FRAME_BUFFER: usize = 16;

/// Open a streaming session for the authenticated principal.
///
/// # Errors
///
/// Returns 401 without a principal and 503 if the log cannot be reached to
/// resolve the resume point.
pub async fn stream_events(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    LastEventId(resume): LastEventId,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, AppError> {
    let session = StreamingSession::open(
        state.replay_engine(),
        state.session.clone(),
        principal.permissions(),
        resume.as_deref(),
    )
    .await?;

    info!(
        principal = %principal.0.id,
        role = %principal.0.role,
        cursor = %session.cursor(),
        resync = session.needs_resync(),
        "Streaming session opened"
    );

    let (sink, frames) = mpsc::channel(FRAME_BUFFER);
    let span = tracing::info_span!("sse_session", principal = %principal.0.id);
    tokio::spawn(session.run(sink, state.shutdown.clone()).instrument(span));

    // Dropping the response drops `frames`, which ends the session
    let events = futures::stream::unfold(frames, |mut frames| async move {
        let frame = frames.recv().await?;
        Some((Ok(sse_event(&frame)), frames))
    });

    Ok(Sse::new(events))
}

/// Encode one session frame.
#[must_use]
pub fn sse_event(frame: &Frame) -> SseEvent {
    match frame {
        Frame::Event(event) => SseEvent::default()
            .id(event.id.to_string())
            .event(TICKET_EVENT)
            .json_data(StreamEventData::new(event))
            .unwrap_or_else(|e| {
                warn!(event_id = %event.id, error = %e, "Failed to encode event frame");
                SseEvent::default().comment("encoding error")
            }),
        Frame::Heartbeat => SseEvent::default().comment("heartbeat"),
        Frame::Resync(cursor) => {
            let id = if cursor.is_beginning() {
                String::new()
            } else {
                cursor.id.to_string()
            };
            SseEvent::default().event(RESYNC_EVENT).id(id).data("{}")
        },
    }
}
