//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "scribe_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "scribe_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "scribe_http_requests_in_flight";

    // Queue metrics
    pub const QUEUE_LENGTH: &str = "scribe_queue_length";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "scribe_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Update queue length gauge.
pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Replace job ids in a path so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let mut previous = "";
    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| {
            let replaced = match previous {
                "transcripts" if !segment.is_empty() => ":job_id",
                "jobs" if !matches!(segment, "" | "expired" | "overview") => ":job_id",
                _ => segment,
            };
            previous = segment;
            replaced
        })
        .collect();
    segments.join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/v1/transcripts/550e8400-e29b-41d4-a716-446655440000"),
            "/v1/transcripts/:job_id"
        );
        assert_eq!(sanitize_path("/v1/jobs/abc123/reset"), "/v1/jobs/:job_id/reset");
        assert_eq!(sanitize_path("/v1/jobs/overview"), "/v1/jobs/overview");
        assert_eq!(sanitize_path("/v1/jobs/expired"), "/v1/jobs/expired");
        assert_eq!(sanitize_path("/v1/jobs"), "/v1/jobs");
        assert_eq!(sanitize_path("/v1/transcripts"), "/v1/transcripts");
    }
}
