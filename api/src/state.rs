//! Shared application state.

use chrono::{DateTime, Utc};
use sentiment_realtime::RealtimeHub;

/// State injected into every route handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Real-time hub.
    pub hub: RealtimeHub,
    /// When the server started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Creates the state around a hub.
    #[must_use]
    pub fn new(hub: RealtimeHub) -> Self {
        Self {
            hub,
            started_at: Utc::now(),
        }
    }

    /// Returns the seconds since startup.
    #[must_use]
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
