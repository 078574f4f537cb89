//! Where submitted and reset jobs are sent.

use std::sync::Arc;

use scribe_queue::DispatchQueue;

use crate::config::ExecutionMode;

/// Route from the lifecycle manager to whoever executes jobs.
#[derive(Clone)]
pub enum Dispatcher {
    /// Run on this process's worker pool.
    Local,
    /// Publish to the Redis stream for worker processes.
    Queue(Arc<dyn DispatchQueue>),
}

impl Dispatcher {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Dispatcher::Local => ExecutionMode::Direct,
            Dispatcher::Queue(_) => ExecutionMode::Queued,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatcher::Local => f.write_str("Dispatcher::Local"),
            Dispatcher::Queue(queue) => write!(f, "Dispatcher::Queue({})", queue.stream_name()),
        }
    }
}
