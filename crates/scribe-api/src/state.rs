//! Application state.

use std::sync::Arc;

use scribe_queue::JobQueue;
use scribe_worker::JobLifecycleManager;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub manager: JobLifecycleManager,
    /// Present in queued mode; used for readiness and queue depth.
    pub queue: Option<Arc<JobQueue>>,
}

impl AppState {
    pub fn new(config: ApiConfig, manager: JobLifecycleManager) -> Self {
        Self {
            config,
            manager,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: Arc<JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }
}
