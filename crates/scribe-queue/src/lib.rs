//! Redis Streams dispatch queue.
//!
//! In queued mode the API process enqueues job ids here and worker
//! processes consume them. Messages stay pending until acknowledged, so a
//! crashed worker's jobs can be claimed by another consumer.

pub mod error;
pub mod message;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use message::DispatchMessage;
pub use queue::{DispatchQueue, EnqueueOutcome, JobQueue, QueueConfig};
