//! Shared data models for the SetScribe backend.
//!
//! This crate provides Serde-serializable types for:
//! - Job records and the job state machine
//! - Processing strategies and analyzer hints
//! - Failure classification
//! - The status projection served to polling clients

pub mod error;
pub mod job;
pub mod job_status;
pub mod strategy;
pub mod view;

// Re-export common types
pub use error::{ErrorDetail, ErrorKind, ModelError, ModelResult};
pub use job::{Hints, InputRef, JobId, JobRecord, JOB_KEY_PREFIX};
pub use job_status::JobStatus;
pub use strategy::Strategy;
pub use view::JobStatusView;
