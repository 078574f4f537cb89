//! Job lifecycle management.
//!
//! This crate provides:
//! - The `JobLifecycleManager` (submit, execute, reset, status, cleanup)
//! - A bounded worker pool with per-job cancellation
//! - Attempt limits, step timeouts and retry backoff
//! - The stalled job watchdog
//! - A Redis Streams consumer for dedicated worker processes

pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod submission;
pub mod timeout;
pub mod watchdog;

pub use config::{ExecutionLimits, ExecutionMode, LifecycleConfig};
pub use dispatch::Dispatcher;
pub use error::{JobError, JobResult};
pub use executor::{ExecutorConfig, JobExecutor};
pub use logging::JobLogger;
pub use manager::{AttemptOutcome, CleanupReport, JobLifecycleManager, JobsOverview};
pub use pool::WorkerPool;
pub use retry::{FailureTracker, RetryPolicy};
pub use submission::{parse_strategy, SubmissionInput};
pub use watchdog::{Watchdog, WatchdogReport};
