//! Job dispatch using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::DispatchMessage;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Prefix for auxiliary keys
    pub key_prefix: String,
    /// How long a job id stays deduplicated if never acknowledged
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "scribe:jobs".to_string(),
            consumer_group: "scribe:workers".to_string(),
            key_prefix: "scribe".to_string(),
            dedup_ttl: Duration::from_secs(7200), // 2 hours
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "scribe:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "scribe:workers".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX")
                .unwrap_or_else(|_| "scribe".to_string()),
            dedup_ttl: Duration::from_secs(
                std::env::var("QUEUE_DEDUP_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(7200),
            ),
        }
    }
}

/// Result of an enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Added with this stream message id
    Enqueued(String),
    /// The job already has an unacknowledged message
    AlreadyQueued,
}

/// Publishing side of the dispatch queue.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Publish `message` unless its job revision already has one pending.
    async fn enqueue(&self, message: &DispatchMessage) -> QueueResult<EnqueueOutcome>;

    fn stream_name(&self) -> &str;
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Acknowledge a message and release its dedup slot.
    pub async fn ack(&self, message_id: &str, message: &DispatchMessage) -> QueueResult<()> {
        let job_id = &message.job_id;
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(message.dedup_key(&self.config.key_prefix)).await?;

        debug!("Acknowledged message {} for job {}", message_id, job_id);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Read new messages for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, DispatchMessage)>> {
        let mut conn = self.conn().await?;

        let result: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let Some(result) = result else {
            return Ok(Vec::new());
        };

        let mut messages = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(message) = self.parse_entry(&entry).await {
                    debug!("Consumed job {} from stream", message.job_id);
                    messages.push((entry.id.clone(), message));
                }
            }
        }

        Ok(messages)
    }

    /// Claim messages left pending by crashed consumers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<(String, DispatchMessage)>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for id in &pending.ids {
            cmd.arg(&id.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let mut messages = Vec::new();
        for entry in claimed.ids {
            if let Some(message) = self.parse_entry(&entry).await {
                info!("Claimed pending job {} from stream", message.job_id);
                messages.push((entry.id.clone(), message));
            }
        }

        Ok(messages)
    }

    /// Decode a stream entry. Malformed entries are acknowledged and dropped.
    async fn parse_entry(&self, entry: &StreamId) -> Option<DispatchMessage> {
        let payload = match entry.map.get("job") {
            Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).to_string(),
            _ => {
                warn!("Stream entry {} has no job payload", entry.id);
                self.drop_message(&entry.id).await;
                return None;
            }
        };

        match serde_json::from_str::<DispatchMessage>(&payload) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Failed to parse job payload: {}", e);
                self.drop_message(&entry.id).await;
                None
            }
        }
    }

    async fn drop_message(&self, message_id: &str) {
        let Ok(mut conn) = self.conn().await else { return };
        let acked: Result<(), redis::RedisError> = redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async(&mut conn)
            .await;
        if let Err(e) = acked {
            warn!("Failed to drop malformed message {}: {}", message_id, e);
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

#[async_trait]
impl DispatchQueue for JobQueue {
    async fn enqueue(&self, message: &DispatchMessage) -> QueueResult<EnqueueOutcome> {
        let job_id = &message.job_id;
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(message)?;
        let dedup_key = message.dedup_key(&self.config.key_prefix);

        // SET NX claims the dedup slot atomically
        let claimed: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !claimed {
            debug!("Job {} already queued", job_id);
            return Ok(EnqueueOutcome::AlreadyQueued);
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!("Enqueued job {} with message ID {}", job_id, message_id);
        Ok(EnqueueOutcome::Enqueued(message_id))
    }

    fn stream_name(&self) -> &str {
        &self.config.stream_name
    }
}
