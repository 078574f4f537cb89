//! Job record persisted in the job store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorDetail, ModelError, ModelResult};
use crate::job_status::JobStatus;
use crate::strategy::Strategy;

/// Prefix of every job key in the store.
pub const JOB_KEY_PREFIX: &str = "job:";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the record lives in the job store.
    pub fn store_key(&self) -> String {
        format!("{}{}", JOB_KEY_PREFIX, self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Reference to the material a job processes. Immutable after creation.
///
/// Serialized as a single prefixed string (`blob:<key>`, `text:<body>`,
/// `job:<id>`) so the persisted record stays flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(into = "String", try_from = "String")]
#[schemars(with = "String")]
pub enum InputRef {
    /// Uploaded content in the blob store.
    Blob(String),
    /// Inline text, used by analysis-only jobs.
    Text(String),
    /// The transcript of an earlier job.
    Job(JobId),
}

impl InputRef {
    pub fn blob_key(&self) -> Option<&str> {
        match self {
            InputRef::Blob(key) => Some(key),
            _ => None,
        }
    }
}

impl From<InputRef> for String {
    fn from(input: InputRef) -> Self {
        match input {
            InputRef::Blob(key) => format!("blob:{}", key),
            InputRef::Text(text) => format!("text:{}", text),
            InputRef::Job(id) => format!("job:{}", id),
        }
    }
}

impl TryFrom<String> for InputRef {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for InputRef {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| ModelError::invalid_input_ref(s))?;
        match scheme {
            "blob" if !rest.is_empty() => Ok(InputRef::Blob(rest.to_string())),
            "text" => Ok(InputRef::Text(rest.to_string())),
            "job" if !rest.is_empty() => Ok(InputRef::Job(JobId::from_string(rest))),
            _ => Err(ModelError::invalid_input_ref(s)),
        }
    }
}

/// Free-form analyzer inputs, passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Hints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_list: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
}

impl Hints {
    pub fn new(set_list: Option<String>, custom_prompt: Option<String>) -> Self {
        Self {
            set_list: set_list.filter(|s| !s.trim().is_empty()),
            custom_prompt: custom_prompt.filter(|s| !s.trim().is_empty()),
        }
    }
}

/// A job, as persisted under `job:<id>`.
///
/// Every mutator refreshes `updated_at` and bumps `revision`. The revision is
/// the compare-and-swap token used when ownership of the record changes hands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub strategy: Strategy,
    pub input_ref: InputRef,

    /// Original upload name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// The input blob belongs to this job and is deleted once it settles
    #[serde(default)]
    pub temporary_input: bool,

    /// The input blob has already been deleted
    #[serde(default)]
    pub input_released: bool,

    #[serde(flatten)]
    pub hints: Hints,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    #[serde(default)]
    pub result_text: Option<String>,

    #[serde(default)]
    pub analysis_text: Option<String>,

    #[serde(default)]
    pub error_detail: Option<ErrorDetail>,

    /// Attempts started since creation or the last administrative reset
    #[serde(default)]
    pub attempts: u32,

    #[serde(default)]
    pub revision: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Expiry recorded for backends without native TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl JobRecord {
    /// Create a new queued job.
    pub fn new(strategy: Strategy, input_ref: InputRef, hints: Hints) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            status: JobStatus::Queued,
            strategy,
            input_ref,
            filename: None,
            temporary_input: false,
            input_released: false,
            hints,
            progress: 0,
            result_text: None,
            analysis_text: None,
            error_detail: None,
            attempts: 0,
            revision: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            ttl_secs: None,
        }
    }

    /// Attach the original upload name.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Mark the input blob as owned by this job.
    pub fn with_temporary_input(mut self, temporary: bool) -> Self {
        self.temporary_input = temporary;
        self
    }

    pub fn store_key(&self) -> String {
        self.job_id.store_key()
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Refresh `updated_at` and bump the revision.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.revision += 1;
    }

    fn transition(&mut self, next: JobStatus) -> ModelResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Claim the job for a new attempt: `queued -> processing` at progress 0.
    pub fn start_processing(&mut self) -> ModelResult<()> {
        self.transition(JobStatus::Processing)?;
        self.progress = 0;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Raise progress. Lower values are ignored.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
        self.touch();
    }

    pub fn set_result(&mut self, text: impl Into<String>, progress: u8) {
        self.result_text = Some(text.into());
        self.set_progress(progress);
    }

    pub fn set_analysis(&mut self, text: impl Into<String>) {
        self.analysis_text = Some(text.into());
        self.set_progress(100);
    }

    /// Mark job as completed.
    pub fn complete(&mut self) -> ModelResult<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Mark job as failed. Partial outputs are kept.
    pub fn fail(&mut self, detail: ErrorDetail) -> ModelResult<()> {
        self.transition(JobStatus::Failed)?;
        self.error_detail = Some(detail);
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Return a processing job to the queue for another attempt.
    /// The attempt counter is kept.
    pub fn requeue(&mut self) -> ModelResult<()> {
        self.transition(JobStatus::Queued)?;
        self.clear_run_state();
        self.touch();
        Ok(())
    }

    /// Administrative reset back to `queued`, from any state.
    pub fn reset(&mut self) {
        self.status = JobStatus::Queued;
        self.clear_run_state();
        self.attempts = 0;
        self.ttl_secs = None;
        self.touch();
    }

    fn clear_run_state(&mut self) {
        self.progress = 0;
        self.result_text = None;
        self.analysis_text = None;
        self.error_detail = None;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Time since the last write.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }

    /// A processing job whose worker has not written for longer than `threshold`.
    pub fn is_stalled(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && self.idle_for(now) > threshold
    }

    /// A terminal job that settled more than `retention` ago.
    pub fn is_past_retention(&self, retention: Duration, now: DateTime<Utc>) -> bool {
        if !self.is_terminal() {
            return false;
        }
        let settled = self.completed_at.unwrap_or(self.updated_at);
        now - settled > retention
    }

    /// Whether the input blob should be deleted now.
    pub fn owns_unreleased_blob(&self) -> bool {
        self.temporary_input && !self.input_released && self.input_ref.blob_key().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn blob_job() -> JobRecord {
        JobRecord::new(
            Strategy::TranscribeAndAnalyze,
            InputRef::Blob("uploads/abc-set.mp3".into()),
            Hints::new(Some("Airline food".into()), None),
        )
        .with_filename("set.mp3")
        .with_temporary_input(true)
    }

    #[test]
    fn test_store_key_format() {
        let id = JobId::from_string("1234");
        assert_eq!(id.store_key(), "job:1234");
    }

    #[test]
    fn test_input_ref_round_trip() {
        let input = InputRef::Blob("uploads/x-y.wav".into());
        let json = serde_json::to_string(&input).unwrap();
        assert_eq!(json, "\"blob:uploads/x-y.wav\"");

        let parsed: InputRef = serde_json::from_str("\"job:abc\"").unwrap();
        assert_eq!(parsed, InputRef::Job(JobId::from_string("abc")));

        let text: InputRef = "text:hello: world".parse().unwrap();
        assert_eq!(text, InputRef::Text("hello: world".into()));

        assert!("ftp:nope".parse::<InputRef>().is_err());
        assert!("blob:".parse::<InputRef>().is_err());
    }

    #[test]
    fn test_record_is_flat_json() {
        let job = blob_job();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["strategy"], "transcribe_and_analyze");
        assert_eq!(json["input_ref"], "blob:uploads/abc-set.mp3");
        assert_eq!(json["set_list"], "Airline food");
        assert!(json.get("hints").is_none());
        assert!(json["result_text"].is_null());

        let back: JobRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut job = blob_job();
        let rev = job.revision;

        job.start_processing().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert!(job.revision > rev);

        job.set_result("hello", 50);
        job.set_progress(10);
        assert_eq!(job.progress, 50);

        job.set_analysis("ANALYZED: hello");
        job.complete().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_fail_preserves_partial_results() {
        let mut job = blob_job();
        job.start_processing().unwrap();
        job.set_result("transcript", 50);
        job.fail(ErrorDetail::analysis_failed()).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.result_text.as_deref(), Some("transcript"));
        assert_eq!(job.error_detail.unwrap().kind, ErrorKind::AnalysisFailure);
    }

    #[test]
    fn test_terminal_states_reject_worker_transitions() {
        let mut job = blob_job();
        job.start_processing().unwrap();
        job.complete().unwrap();

        assert!(job.start_processing().is_err());
        assert!(job.fail(ErrorDetail::processing_failed()).is_err());
        assert!(job.requeue().is_err());
    }

    #[test]
    fn test_reset_clears_outputs() {
        let mut job = blob_job();
        job.start_processing().unwrap();
        job.set_result("transcript", 50);
        job.fail(ErrorDetail::analysis_failed()).unwrap();

        job.reset();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.attempts, 0);
        assert!(job.result_text.is_none());
        assert!(job.analysis_text.is_none());
        assert!(job.error_detail.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_requeue_keeps_attempts() {
        let mut job = blob_job();
        job.start_processing().unwrap();
        job.requeue().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
        job.start_processing().unwrap();
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn test_stalled_and_retention_checks() {
        let mut job = blob_job();
        let now = Utc::now();
        assert!(!job.is_stalled(Duration::minutes(10), now + Duration::minutes(30)));

        job.start_processing().unwrap();
        assert!(!job.is_stalled(Duration::minutes(10), now + Duration::minutes(5)));
        assert!(job.is_stalled(Duration::minutes(10), now + Duration::minutes(11)));

        job.complete().unwrap();
        assert!(!job.is_past_retention(Duration::hours(1), now + Duration::minutes(59)));
        assert!(job.is_past_retention(Duration::hours(1), now + Duration::minutes(61)));
    }

    #[test]
    fn test_owns_unreleased_blob() {
        let mut job = blob_job();
        assert!(job.owns_unreleased_blob());
        job.input_released = true;
        assert!(!job.owns_unreleased_blob());

        let text_job = JobRecord::new(
            Strategy::AnalyzeOnly,
            InputRef::Text("words".into()),
            Hints::default(),
        )
        .with_temporary_input(true);
        assert!(!text_job.owns_unreleased_blob());
    }

    #[test]
    fn test_hints_drop_blank_values() {
        let hints = Hints::new(Some("   ".into()), Some("Summarize {transcript}".into()));
        assert!(hints.set_list.is_none());
        assert_eq!(hints.custom_prompt.as_deref(), Some("Summarize {transcript}"));
    }
}
