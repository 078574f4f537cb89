//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::{
    cleanup_expired_jobs, get_prompt, get_transcript, health, jobs_overview, list_jobs, ready, reset_job,
    submit_analysis, submit_transcript,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let rate_limiter = Arc::new(RateLimiterCache::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    ));

    // Submissions carry uploads; rate limited per client IP
    let submission_routes = Router::new()
        .route("/v1/transcripts", post(submit_transcript))
        .route("/v1/analyses", post(submit_analysis))
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let status_routes = Router::new()
        .route("/v1/transcripts/:job_id", get(get_transcript))
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/prompt", get(get_prompt));

    // Recovery and maintenance
    let admin_routes = Router::new()
        .route("/v1/jobs/overview", get(jobs_overview))
        .route("/v1/jobs/expired", delete(cleanup_expired_jobs))
        .route("/v1/jobs/:job_id/reset", post(reset_job));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(submission_routes)
        .merge(
            status_routes
                .merge(admin_routes)
                .layer(TimeoutLayer::new(state.config.request_timeout)),
        )
        .merge(health_routes)
        .merge(metrics_routes)
        // Extractors honour the same cap as the transport limit
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
