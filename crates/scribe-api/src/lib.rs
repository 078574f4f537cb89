//! Axum HTTP API server.
//!
//! This crate provides:
//! - Job submission (audio uploads and analysis requests)
//! - Status polling over a single status schema
//! - Recovery endpoints: reset, expired cleanup, stuck-job overview
//! - Rate limiting, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
