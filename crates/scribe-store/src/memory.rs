//! Sharded in-memory backend.
//!
//! Values are kept as the same JSON the Redis backend writes, so both
//! backends round-trip records identically. Expiry is checked lazily on
//! read and swept by `purge_expired`.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use scribe_models::{JobId, JobRecord};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::store::{decode_record, encode_record, JobStore};

const DEFAULT_SHARDS: usize = 16;

#[derive(Debug, Clone)]
struct Entry {
    json: String,
    revision: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Single-process job store.
#[derive(Debug)]
pub struct MemoryJobStore {
    shards: Vec<RwLock<HashMap<String, Entry>>>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shards(count: usize) -> Self {
        let count = count.max(1);
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    fn entry(record: &JobRecord, ttl: Option<Duration>) -> StoreResult<Entry> {
        Ok(Entry {
            json: encode_record(record, ttl)?,
            revision: record.revision,
            expires_at: ttl.map(|d| Instant::now() + d),
        })
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, record: &JobRecord, ttl: Option<Duration>) -> StoreResult<()> {
        let key = record.store_key();
        let entry = Self::entry(record, ttl)?;
        self.shard(&key).write().await.insert(key, entry);
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        let key = job_id.store_key();
        let shard = self.shard(&key);

        let expired = {
            let map = shard.read().await;
            match map.get(&key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    return decode_record(&key, &entry.json).map(Some);
                }
                Some(_) => true,
            }
        };

        if expired {
            let mut map = shard.write().await;
            if map.get(&key).is_some_and(|e| e.is_expired(Instant::now())) {
                map.remove(&key);
                debug!(key = %key, "Evicted expired job record");
            }
        }
        Ok(None)
    }

    async fn list(&self) -> StoreResult<Vec<JobRecord>> {
        let now = Instant::now();
        let mut records = Vec::new();
        for shard in &self.shards {
            let map = shard.read().await;
            for (key, entry) in map.iter() {
                if entry.is_expired(now) {
                    continue;
                }
                match decode_record(key, &entry.json) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping unreadable record: {}", e),
                }
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn delete(&self, job_id: &JobId) -> StoreResult<bool> {
        let key = job_id.store_key();
        let removed = self.shard(&key).write().await.remove(&key);
        Ok(removed.is_some_and(|e| !e.is_expired(Instant::now())))
    }

    async fn compare_and_put(
        &self,
        record: &JobRecord,
        expected_revision: u64,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let key = record.store_key();
        let entry = Self::entry(record, ttl)?;
        let mut map = self.shard(&key).write().await;

        let matches = map
            .get(&key)
            .is_some_and(|current| !current.is_expired(Instant::now()) && current.revision == expected_revision);
        if !matches {
            return Ok(false);
        }
        map.insert(key, entry);
        Ok(true)
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let now = Instant::now();
        let mut purged = 0u64;
        for shard in &self.shards {
            let mut map = shard.write().await;
            let before = map.len();
            map.retain(|_, entry| !entry.is_expired(now));
            purged += (before - map.len()) as u64;
        }
        if purged > 0 {
            debug!("Purged {} expired job records", purged);
        }
        Ok(purged)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn native_ttl(&self) -> bool {
        false
    }
}
