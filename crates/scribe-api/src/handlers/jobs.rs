//! Job submission and status polling handlers.
//!
//! Submissions return `202 Accepted` as soon as the job is persisted; clients
//! poll `GET /v1/transcripts/:job_id` for progress and results.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use scribe_models::{Hints, JobId, JobStatus, JobStatusView, Strategy};
use scribe_worker::{parse_strategy, ExecutionMode, SubmissionInput};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Upper bound on `GET /v1/jobs` page size.
const MAX_LIST_LIMIT: usize = 500;

// ============================================================================
// Types
// ============================================================================

/// Response to an accepted submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

impl SubmitResponse {
    fn accepted(job_id: JobId, state: &AppState) -> (StatusCode, Json<Self>) {
        let message = match state.manager.config().mode {
            ExecutionMode::Direct => "Job accepted for processing",
            ExecutionMode::Queued => "Job queued for a worker",
        };
        (
            StatusCode::ACCEPTED,
            Json(Self {
                job_id,
                status: JobStatus::Queued,
                message: message.to_string(),
            }),
        )
    }
}

/// Body of `POST /v1/analyses`. Exactly one of `source_job_id` and `text`.
#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub source_job_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub set_list: Option<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

/// Query parameters for `GET /v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusView>,
    pub total: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/transcripts
///
/// Multipart fields: `file` (required), `strategy`, `set_list`,
/// `custom_prompt`. A missing strategy means `transcribe_only`.
///
/// Returns:
/// - 202: Job accepted
/// - 400: Missing or empty file, unsupported extension, oversized upload,
///   unknown strategy
pub async fn submit_transcript(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut strategy: Option<Strategy> = None;
    let mut set_list = None;
    let mut custom_prompt = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                upload = Some((filename, bytes.to_vec()));
            }
            "strategy" => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    strategy = Some(parse_strategy(&value)?);
                }
            }
            "set_list" => set_list = Some(field.text().await?),
            "custom_prompt" => custom_prompt = Some(field.text().await?),
            _ => {}
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| ApiError::bad_request("No file provided"))?;
    let strategy = strategy.unwrap_or_default();

    info!(
        "submit_transcript filename={} bytes={} strategy={}",
        filename,
        bytes.len(),
        strategy
    );

    let job_id = state
        .manager
        .submit(
            SubmissionInput::upload(filename, bytes),
            strategy,
            Hints::new(set_list, custom_prompt),
        )
        .await?;

    Ok(SubmitResponse::accepted(job_id, &state))
}

/// POST /v1/analyses
///
/// Creates an `analyze_only` job over an earlier job's transcript or over
/// inline text.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let input = match (request.source_job_id, request.text) {
        (Some(source), None) => SubmissionInput::SourceJob(JobId::from_string(source)),
        (None, Some(text)) => SubmissionInput::Text(text),
        (Some(_), Some(_)) => {
            return Err(ApiError::bad_request(
                "Provide either source_job_id or text, not both",
            ))
        }
        (None, None) => return Err(ApiError::bad_request("Provide source_job_id or text")),
    };

    info!("submit_analysis input={}", describe(&input));

    let job_id = state
        .manager
        .submit(
            input,
            Strategy::AnalyzeOnly,
            Hints::new(request.set_list, request.custom_prompt),
        )
        .await?;

    Ok(SubmitResponse::accepted(job_id, &state))
}

/// GET /v1/transcripts/:job_id
///
/// Returns:
/// - 200: Current status view
/// - 404: Unknown or expired job
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let job_id = JobId::from_string(job_id);
    state
        .manager
        .get_status(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))
}

/// GET /v1/jobs
///
/// Newest first. Optional `status` filter and `limit`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let mut jobs: Vec<JobStatusView> = state
        .manager
        .list()
        .await?
        .into_iter()
        .filter(|view| query.status.map_or(true, |status| view.status == status))
        .collect();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = jobs.len();
    jobs.truncate(query.limit.unwrap_or(MAX_LIST_LIMIT).min(MAX_LIST_LIMIT));

    Ok(Json(JobListResponse { jobs, total }))
}

fn describe(input: &SubmissionInput) -> String {
    match input {
        SubmissionInput::Upload { filename, bytes } => format!("upload:{}({} bytes)", filename, bytes.len()),
        SubmissionInput::Text(text) => format!("text({} chars)", text.chars().count()),
        SubmissionInput::SourceJob(job_id) => format!("job:{}", job_id),
    }
}
