use std::sync::Arc;
use std::time::Instant;

use storage::{ProgressHandle, RotatingStore};

use crate::LogBuffer;

/// Read-only view over the running engine, shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RotatingStore>,
    pub progress: ProgressHandle,
    pub logs: LogBuffer,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<RotatingStore>, progress: ProgressHandle, logs: LogBuffer) -> Self {
        Self {
            store,
            progress,
            logs,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
