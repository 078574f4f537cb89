//! Error classification shared by every crate.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job_status::JobStatus;

pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building or mutating model types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("Invalid input reference: {0}")]
    InvalidInputRef(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

impl ModelError {
    pub fn invalid_strategy(value: impl Into<String>) -> Self {
        Self::InvalidStrategy(value.into())
    }

    pub fn invalid_input_ref(value: impl Into<String>) -> Self {
        Self::InvalidInputRef(value.into())
    }
}

/// Classification tag recorded on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    TranscriptionFailure,
    AnalysisFailure,
    /// Analysis could not start: no precursor text, or too short.
    PrecursorMissing,
    Timeout,
    StorageFailure,
    RetriesExhausted,
    /// Unclassified failure inside the pipeline.
    ProcessingFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::TranscriptionFailure => "transcription_failure",
            ErrorKind::AnalysisFailure => "analysis_failure",
            ErrorKind::PrecursorMissing => "precursor_missing",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::ProcessingFailure => "processing_failure",
        }
    }

    /// Whether the scheduler should run another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::TranscriptionFailure
                | ErrorKind::AnalysisFailure
                | ErrorKind::StorageFailure
        )
    }

    /// Whether this is a subclass of analysis failure.
    pub fn is_analysis_failure(&self) -> bool {
        matches!(self, ErrorKind::AnalysisFailure | ErrorKind::PrecursorMissing)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sanitized failure description stored on the job.
///
/// `message` is written for end users. Vendor error text never goes here,
/// it is only logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transcription_failed() -> Self {
        Self::new(
            ErrorKind::TranscriptionFailure,
            "The speech-to-text service could not transcribe this audio.",
        )
    }

    pub fn empty_transcript() -> Self {
        Self::new(
            ErrorKind::TranscriptionFailure,
            "The speech-to-text service returned an empty transcript.",
        )
    }

    pub fn analysis_failed() -> Self {
        Self::new(
            ErrorKind::AnalysisFailure,
            "The analysis service could not annotate this transcript.",
        )
    }

    pub fn precursor_missing(min_chars: usize) -> Self {
        Self::new(
            ErrorKind::PrecursorMissing,
            format!(
                "No transcript of at least {} characters is available to analyze.",
                min_chars
            ),
        )
    }

    pub fn step_timeout(step: &str) -> Self {
        Self::new(ErrorKind::Timeout, format!("The {} step timed out.", step))
    }

    pub fn job_timeout() -> Self {
        Self::new(
            ErrorKind::Timeout,
            "Processing exceeded the time limit for this job.",
        )
    }

    pub fn worker_stalled() -> Self {
        Self::new(
            ErrorKind::Timeout,
            "Processing stopped responding. The worker may have crashed. Please try again.",
        )
    }

    pub fn storage_unavailable() -> Self {
        Self::new(
            ErrorKind::StorageFailure,
            "The uploaded input could not be read from storage.",
        )
    }

    /// The input is gone for good, e.g. released before a reset.
    pub fn input_missing() -> Self {
        Self::new(
            ErrorKind::InvalidInput,
            "The uploaded input is no longer available. Please upload it again.",
        )
    }

    pub fn processing_failed() -> Self {
        Self::new(
            ErrorKind::ProcessingFailure,
            "An unexpected error occurred while processing this job.",
        )
    }

    /// Terminal wrapper recorded once the attempt budget is spent.
    pub fn retries_exhausted(attempts: u32, last: &ErrorDetail) -> Self {
        Self::new(
            ErrorKind::RetriesExhausted,
            format!("Gave up after {} attempts. Last error: {}", attempts, last.message),
        )
    }
}
