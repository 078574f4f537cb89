//! API error types.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scribe_worker::JobError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Job error: {0}")]
    Job(JobError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::InvalidStrategy(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Job(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code returned alongside the detail.
    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "invalid_input",
            ApiError::InvalidStrategy(_) => "invalid_strategy",
            ApiError::Conflict(_) => "conflict",
            ApiError::RateLimited => "rate_limited",
            ApiError::Internal(_) => "internal_error",
            ApiError::Job(JobError::Dispatch(_)) => "dispatch_failed",
            ApiError::Job(_) => "storage_failure",
        }
    }

    fn is_internal(&self) -> bool {
        matches!(self, ApiError::Internal(_) | ApiError::Job(_))
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::InvalidInput(msg) => ApiError::BadRequest(msg),
            JobError::InvalidStrategy(value) => ApiError::InvalidStrategy(format!(
                "'{}' (expected transcribe_only, transcribe_and_analyze or analyze_only)",
                value
            )),
            JobError::NotFound(job_id) => ApiError::NotFound(format!("Job {} not found", job_id)),
            JobError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Job(other),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("Malformed upload: {}", err.body_text()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if self.is_internal() {
            error!("Request failed: {}", self);
            if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                "An internal error occurred".to_string()
            } else {
                self.to_string()
            }
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_errors_map_to_status() {
        let cases = [
            (JobError::invalid_input("empty file"), StatusCode::BAD_REQUEST),
            (JobError::InvalidStrategy("fast".into()), StatusCode::BAD_REQUEST),
            (JobError::not_found("abc"), StatusCode::NOT_FOUND),
            (JobError::conflict("running"), StatusCode::CONFLICT),
            (JobError::storage("down"), StatusCode::INTERNAL_SERVER_ERROR),
            (JobError::dispatch("redis"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_codes() {
        assert_eq!(ApiError::from(JobError::invalid_input("x")).code(), "invalid_input");
        assert_eq!(ApiError::from(JobError::dispatch("x")).code(), "dispatch_failed");
        assert_eq!(ApiError::RateLimited.code(), "rate_limited");
    }
}
