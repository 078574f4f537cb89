//! Redis backend with native key expiry.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use scribe_models::{JobId, JobRecord, JOB_KEY_PREFIX};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::{decode_record, encode_record, JobStore};

/// Compare the stored revision and overwrite atomically.
/// ARGV: expected revision, new JSON, TTL seconds (0 for none).
const COMPARE_AND_PUT_LUA: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return 0
end
local decoded = cjson.decode(current)
if tonumber(decoded['revision'] or 0) ~= tonumber(ARGV[1]) then
  return 0
end
if tonumber(ARGV[3]) > 0 then
  redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
else
  redis.call('SET', KEYS[1], ARGV[2])
end
return 1
"#;

const SCAN_BATCH: usize = 200;

/// Multi-process job store on Redis.
pub struct RedisJobStore {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    cas_script: Script,
}

impl RedisJobStore {
    /// Create a new store. Connects lazily.
    pub fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            cas_script: Script::new(COMPARE_AND_PUT_LUA),
        })
    }

    async fn conn(&self) -> StoreResult<MultiplexedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = self.client.get_multiplexed_async_connection().await?;
                info!("Connected job store to Redis");
                Ok::<_, redis::RedisError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    async fn scan_keys(&self, conn: &mut MultiplexedConnection) -> StoreResult<Vec<String>> {
        let pattern = format!("{}*", JOB_KEY_PREFIX);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn put(&self, record: &JobRecord, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let key = record.store_key();
        let json = encode_record(record, ttl)?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(json);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        cmd.query_async::<()>(&mut conn).await?;

        debug!(key = %key, status = %record.status, "Stored job record");
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let key = job_id.store_key();
        let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        raw.map(|json| decode_record(&key, &json)).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<JobRecord>> {
        let mut conn = self.conn().await?;
        let keys = self.scan_keys(&mut conn).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(SCAN_BATCH) {
            let values: Vec<Option<String>> = redis::cmd("MGET").arg(chunk).query_async(&mut conn).await?;
            for (key, value) in chunk.iter().zip(values) {
                // Expired between SCAN and MGET
                let Some(json) = value else { continue };
                match decode_record(key, &json) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping unreadable record: {}", e),
                }
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn delete(&self, job_id: &JobId) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("DEL").arg(job_id.store_key()).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn compare_and_put(
        &self,
        record: &JobRecord,
        expected_revision: u64,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let json = encode_record(record, ttl)?;
        let ttl_secs = ttl.map(|d| d.as_secs().max(1)).unwrap_or(0);

        let written: i64 = self
            .cas_script
            .key(record.store_key())
            .arg(expected_revision)
            .arg(json)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        Ok(0)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }

    fn native_ttl(&self) -> bool {
        true
    }
}
