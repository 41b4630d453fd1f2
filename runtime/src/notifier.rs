//! Local publish entrypoint.
//!
//! [`Notifier::emit`] is what ticket handlers call after a state change:
//!
//! 1. Append to the event log (source of truth; failure is returned)
//! 2. Broadcast to the local hub
//! 3. Publish on the bus for other processes (failure is logged, not returned)
//!
//! Streaming sessions pick the event up from the log on their next poll, so
//! they need nothing from the notifier.

use crate::bridge::BusBridge;
use crate::hub::HubHandle;
use std::sync::Arc;
use thiserror::Error;
use ticket_events_core::event::{Event, EventType, Payload, TicketId};
use ticket_events_core::event_log::{EventLog, EventLogError};
use tracing::{debug, error, warn};

/// Errors from [`Notifier::emit`].
#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    /// The event could not be appended; nothing was delivered.
    #[error("Failed to append event: {0}")]
    Append(#[from] EventLogError),
}

/// Appends events and fans them out locally and across processes.
#[derive(Clone)]
pub struct Notifier {
    log: Arc<dyn EventLog>,
    hub: HubHandle,
    bridge: Option<Arc<BusBridge>>,
}

impl Notifier {
    /// Notifier delivering to the local hub only.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, hub: HubHandle) -> Self {
        Self {
            log,
            hub,
            bridge: None,
        }
    }

    /// Also publish every emitted event through `bridge`.
    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<BusBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Record a ticket event and deliver it.
    ///
    /// Returns the stored event once it is in the log; delivery problems after
    /// that point only degrade fan-out and are logged.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Append`] if the log rejected the event.
    pub async fn emit(
        &self,
        ticket_id: TicketId,
        event_type: EventType,
        payload: Payload,
    ) -> Result<Event, NotifyError> {
        let event = self
            .log
            .append(ticket_id, event_type, payload)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to append ticket event"))?;

        debug!(event_id = %event.id, ticket_id = %event.ticket_id, event_type = %event.event_type, "Ticket event appended");

        if let Err(e) = self.hub.broadcast(event.clone()).await {
            warn!(event_id = %event.id, error = %e, "Local hub unavailable, event not broadcast");
        }

        if let Some(bridge) = &self.bridge {
            if let Err(e) = bridge.publish(&event).await {
                warn!(event_id = %event.id, error = %e, "Event bus unavailable, local-only delivery");
            }
        }

        Ok(event)
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("bridge", &self.bridge.is_some())
            .finish_non_exhaustive()
    }
}
