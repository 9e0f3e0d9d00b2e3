// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use crate::jobs::JobCoordinator;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Entry point for every download operation.
    pub coordinator: Arc<JobCoordinator>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(coordinator: Arc<JobCoordinator>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            coordinator,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
