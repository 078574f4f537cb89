//! Read-only projection served to polling clients.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ErrorDetail;
use crate::job::{JobId, JobRecord};
use crate::job_status::JobStatus;
use crate::strategy::Strategy;

/// Status of a job as seen by clients.
///
/// This is the only status shape the API returns. Optional outputs are
/// always present in JSON, as `null` when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub strategy: Strategy,
    pub progress: u8,
    pub result_text: Option<String>,
    pub analysis_text: Option<String>,
    pub error_detail: Option<ErrorDetail>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobStatusView {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            status: record.status,
            strategy: record.strategy,
            progress: record.progress,
            result_text: record.result_text.clone(),
            analysis_text: record.analysis_text.clone(),
            error_detail: record.error_detail.clone(),
            attempts: record.attempts,
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
        }
    }
}

impl From<JobRecord> for JobStatusView {
    fn from(record: JobRecord) -> Self {
        Self::from(&record)
    }
}
