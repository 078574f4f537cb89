//! AI adapter error types.

use thiserror::Error;

pub type AiResult<T> = Result<T, AiError>;

/// Raw adapter errors. These carry vendor detail and are only logged;
/// jobs record a sanitized classification instead.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AiError {
    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Rate limits, server errors and transport failures.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::RequestFailed(_) => true,
            AiError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        AiError::RequestFailed(e.to_string())
    }
}
