//! Application state shared across handlers.

use std::sync::Arc;
use ticket_events_core::event_log::EventLog;
use ticket_events_core::replay::ReplayEngine;
use ticket_events_runtime::{HubHandle, SessionConfig};
use tokio::sync::watch;

/// State handed to every handler.
///
/// Cheap to clone: everything inside is a handle.
#[derive(Clone)]
pub struct AppState {
    /// Event log, source of truth for streaming sessions.
    pub log: Arc<dyn EventLog>,
    /// Handle to the running broadcast hub.
    pub hub: HubHandle,
    /// Settings applied to every streaming session.
    pub session: SessionConfig,
    /// Flips to `true` when the server shuts down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Bundle the state.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        hub: HubHandle,
        session: SessionConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            log,
            hub,
            session,
            shutdown,
        }
    }

    /// A replay engine over the shared log.
    #[must_use]
    pub fn replay_engine(&self) -> ReplayEngine {
        ReplayEngine::new(Arc::clone(&self.log))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub", &self.hub)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
