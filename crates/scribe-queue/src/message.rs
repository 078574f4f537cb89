//! Stream message payload.

use chrono::{DateTime, Utc};
use scribe_models::JobId;
use serde::{Deserialize, Serialize};

/// Asks a worker to run a job. The job record itself lives in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub job_id: JobId,
    /// Revision of the queued record this message was published for
    #[serde(default)]
    pub revision: u64,
    pub enqueued_at: DateTime<Utc>,
}

impl DispatchMessage {
    pub fn new(job_id: JobId, revision: u64) -> Self {
        Self {
            job_id,
            revision,
            enqueued_at: Utc::now(),
        }
    }

    /// Key guarding against the same queued revision being published twice.
    /// A reset writes a new revision, so it never collides with the message
    /// of the run it replaces.
    pub fn dedup_key(&self, prefix: &str) -> String {
        format!("{}:dedup:{}:{}", prefix, self.job_id, self.revision)
    }
}
