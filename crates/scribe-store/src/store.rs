//! The job store contract.

use std::time::Duration;

use async_trait::async_trait;
use scribe_models::{JobId, JobRecord};

use crate::error::{StoreError, StoreResult};

/// Durable record of job state, keyed by `job:<id>`.
///
/// `put` overwrites the whole record. A `ttl` of `None` stores the record
/// without expiry, which is how queued and processing jobs are written.
/// Expired records read as absent.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put(&self, record: &JobRecord, ttl: Option<Duration>) -> StoreResult<()>;

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>>;

    /// All live records. Not linearizable with concurrent writes.
    async fn list(&self) -> StoreResult<Vec<JobRecord>>;

    /// Returns whether a record was removed.
    async fn delete(&self, job_id: &JobId) -> StoreResult<bool>;

    /// Write `record` only if the stored record exists and still carries
    /// `expected_revision`. Returns whether the write happened.
    async fn compare_and_put(
        &self,
        record: &JobRecord,
        expected_revision: u64,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Drop expired records. A no-op for backends with native expiry.
    async fn purge_expired(&self) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;

    /// Whether the backend evicts expired keys on its own.
    fn native_ttl(&self) -> bool;
}

/// Serialize a record, recording its TTL in the body.
pub fn encode_record(record: &JobRecord, ttl: Option<Duration>) -> StoreResult<String> {
    let ttl_secs = ttl.map(|d| d.as_secs().max(1));
    if record.ttl_secs == ttl_secs {
        return Ok(serde_json::to_string(record)?);
    }
    let mut stored = record.clone();
    stored.ttl_secs = ttl_secs;
    Ok(serde_json::to_string(&stored)?)
}

pub fn decode_record(key: &str, raw: &str) -> StoreResult<JobRecord> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
