//! Lifecycle manager error types.

use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

/// Errors returned synchronously by manager operations.
///
/// Failures during execution are never returned here; they are recorded on
/// the job as an `ErrorDetail`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

impl JobError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(job_id: impl Into<String>) -> Self {
        Self::NotFound(job_id.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    /// Whether the caller sent something unacceptable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            JobError::InvalidInput(_) | JobError::InvalidStrategy(_)
        )
    }
}

impl From<scribe_models::ModelError> for JobError {
    fn from(err: scribe_models::ModelError) -> Self {
        match err {
            scribe_models::ModelError::InvalidStrategy(s) => JobError::InvalidStrategy(s),
            other => JobError::InvalidInput(other.to_string()),
        }
    }
}

impl From<scribe_store::StoreError> for JobError {
    fn from(err: scribe_store::StoreError) -> Self {
        JobError::Storage(err.to_string())
    }
}

impl From<scribe_storage::StorageError> for JobError {
    fn from(err: scribe_storage::StorageError) -> Self {
        JobError::Storage(err.to_string())
    }
}

impl From<scribe_queue::QueueError> for JobError {
    fn from(err: scribe_queue::QueueError) -> Self {
        JobError::Dispatch(err.to_string())
    }
}
