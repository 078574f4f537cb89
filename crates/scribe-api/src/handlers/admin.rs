//! Recovery and maintenance handlers.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use scribe_models::{JobId, JobStatusView};
use scribe_worker::{CleanupReport, JobsOverview};

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetJobResponse {
    pub job: JobStatusView,
    pub message: String,
}

/// POST /v1/jobs/:job_id/reset
///
/// Returns:
/// - 202: Job cleared and re-queued
/// - 404: Unknown job
/// - 409: Job is queued or still making progress
pub async fn reset_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<ResetJobResponse>)> {
    let job_id = JobId::from_string(job_id);
    let job = state.manager.reset(&job_id).await?;

    info!("Reset job {} to queued", job_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(ResetJobResponse {
            job,
            message: "Job reset and queued for processing".to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    /// Override the configured retention window.
    #[serde(default)]
    pub retention_secs: Option<u64>,
}

/// DELETE /v1/jobs/expired
///
/// Deletes terminal jobs older than the retention window along with any
/// temporary inputs they still hold.
pub async fn cleanup_expired_jobs(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<Json<CleanupReport>> {
    let retention = query
        .retention_secs
        .map(Duration::from_secs)
        .unwrap_or(state.manager.config().retention);

    let report = state.manager.cleanup_expired(retention).await?;

    info!(
        "Expired job cleanup: deleted={} purged={} inputs_released={}",
        report.deleted, report.purged, report.inputs_released
    );

    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    #[serde(flatten)]
    pub jobs: JobsOverview,
    pub mode: String,
    pub pool_capacity: usize,
    pub pool_available: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<u64>,
}

/// GET /v1/jobs/overview
///
/// Counts by status plus jobs that look stuck.
pub async fn jobs_overview(State(state): State<AppState>) -> ApiResult<Json<OverviewResponse>> {
    let jobs = state.manager.overview().await?;
    let pool = state.manager.pool();

    let queue_length = match &state.queue {
        Some(queue) => match queue.len().await {
            Ok(length) => {
                metrics::set_queue_length(length);
                Some(length)
            }
            Err(e) => {
                warn!("Failed to read queue length: {}", e);
                None
            }
        },
        None => None,
    };

    Ok(Json(OverviewResponse {
        jobs,
        mode: state.manager.config().mode.as_str().to_string(),
        pool_capacity: pool.capacity(),
        pool_available: pool.available_permits(),
        queue_length,
    }))
}
