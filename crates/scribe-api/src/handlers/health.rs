//! Health check handlers.

use std::future::Future;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::metrics;
use crate::state::AppState;

/// Upper bound on a single dependency probe.
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub mode: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.manager.config().mode.as_str().to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub job_store: CheckStatus,
    pub blob_store: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<CheckStatus>,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(backend: &str, latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            backend: backend.to_string(),
            error: None,
            latency_ms: Some(latency_ms),
        }
    }

    fn error(backend: &str, msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            backend: backend.to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

async fn probe<T, E, F>(backend: &str, check: F) -> CheckStatus
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    match tokio::time::timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(_)) => CheckStatus::ok(backend, start.elapsed().as_millis() as u64),
        Ok(Err(e)) => CheckStatus::error(backend, e.to_string()),
        Err(_) => CheckStatus::error(backend, format!("no response within {:?}", CHECK_TIMEOUT)),
    }
}

/// Readiness check endpoint (readiness probe).
/// Checks the job store, the blob store and, in queued mode, Redis.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let store = state.manager.store();
    let blobs = state.manager.blobs();

    let job_store = probe(store.backend_name(), store.ping()).await;
    let blob_store = probe(blobs.backend_name(), blobs.ping()).await;
    let queue = match &state.queue {
        Some(queue) => {
            let check = probe("redis", async {
                let length = queue.len().await?;
                metrics::set_queue_length(length);
                Ok::<_, scribe_queue::QueueError>(())
            })
            .await;
            Some(check)
        }
        None => None,
    };

    let all_ok = job_store.is_ok() && blob_store.is_ok() && queue.as_ref().map_or(true, CheckStatus::is_ok);

    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            job_store,
            blob_store,
            queue,
        },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
