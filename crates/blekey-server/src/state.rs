//! Application state shared across handlers.

use std::sync::Arc;

use blekey_core::{ManagerHandle, RadioEventSender};
use chrono::{DateTime, Utc};

/// Shared application state.
pub type SharedState = Arc<AppState>;

/// Handles to the running credential manager.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Command handle for the manager task.
    pub manager: ManagerHandle,

    /// Radio side of the event queue, kept for its drop counter.
    pub radio_events: RadioEventSender,

    /// Which radio backend is in use (`bluez` or `simulated`).
    pub radio_backend: &'static str,

    /// When the server started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wrap a running manager for use by the HTTP handlers.
    #[must_use]
    pub fn new(
        manager: ManagerHandle,
        radio_events: RadioEventSender,
        radio_backend: &'static str,
    ) -> SharedState {
        Arc::new(Self {
            manager,
            radio_events,
            radio_backend,
            started_at: Utc::now(),
        })
    }
}
