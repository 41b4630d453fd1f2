//! WebSocket endpoint for live ticket events.
//!
//! ```text
//! Client          WebSocket Handler            Hub
//!   │                    │                      │
//!   ├─ Upgrade ─────────>│                      │
//!   │                    ├─ register ──────────>│
//!   │                    │<── queued event ─────┤
//!   │<─ Text frame ──────┤                      │
//!   │                    │                      │
//!   ├─ Close ───────────>│                      │
//!   │                    ├─ unregister ────────>│
//! ```
//!
//! **Server → Client:**
//! ```json
//! {
//!   "type": "comment_added",
//!   "data": {"id": "...", "ticket_id": "T-1", "payload": {...}, "created_at": "..."}
//! }
//! ```
//!
//! Inbound messages are read only to notice the client leaving. There is no
//! replay on this transport; clients that need gap-free delivery use SSE.
//! A client that cannot keep up is disconnected by the hub.

use crate::extractors::AuthenticatedPrincipal;
use crate::state::AppState;
use crate::wire::SocketEventFrame;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use ticket_events_core::access::Principal;
use ticket_events_runtime::HubHandle;
use tracing::{Instrument, debug, info, warn};

/// Upgrade to a WebSocket and attach it to the hub.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn handle(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Response {
    let principal = principal.into_inner();
    info!(principal = %principal.id, role = %principal.role, "WebSocket connection requested");

    let span = tracing::info_span!("ws_connection", principal = %principal.id);
    ws.on_upgrade(move |socket| serve_connection(socket, state.hub, principal).instrument(span))
}

/// Connection lifecycle: register, pump events until either side is done,
/// unregister.
async fn serve_connection(socket: WebSocket, hub: HubHandle, principal: Principal) {
    let mut subscription = match hub.connect(principal).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Hub unavailable, closing WebSocket");
            return;
        },
    };
    let id = subscription.id();
    info!(connection_id = %id, "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();

    // The hub closes the queue on unregister, overflow or shutdown
    let write = async {
        while let Some(event) = subscription.recv().await {
            let text = match serde_json::to_string(&SocketEventFrame::new(&event)) {
                Ok(text) => text,
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Failed to encode event frame");
                    continue;
                },
            };
            if sender.send(Message::Text(text)).await.is_err() {
                debug!("Client write failed");
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    };

    let read = async {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    };

    tokio::select! {
        () = write => debug!(connection_id = %id, "Outbound queue closed"),
        () = read => debug!(connection_id = %id, "Client went away"),
    }

    if let Err(e) = hub.unregister(id).await {
        debug!(connection_id = %id, error = %e, "Hub already stopped");
    }
    info!(connection_id = %id, "WebSocket connection closed");
}
