//! Backend selection.

use std::sync::Arc;

use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryJobStore;
use crate::redis_store::RedisJobStore;
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStoreBackend {
    Memory,
    Redis,
}

impl std::str::FromStr for JobStoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(JobStoreBackend::Memory),
            "redis" | "valkey" => Ok(JobStoreBackend::Redis),
            other => Err(StoreError::config(format!("Unknown job store backend: {}", other))),
        }
    }
}

/// Job store configuration.
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    pub backend: JobStoreBackend,
    /// Redis URL
    pub redis_url: String,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            backend: JobStoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

impl JobStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let backend = match std::env::var("JOB_STORE") {
            Ok(value) => value.parse()?,
            Err(_) => JobStoreBackend::Memory,
        };
        Ok(Self {
            backend,
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        })
    }
}

/// Build the configured job store.
pub fn create_job_store(config: &JobStoreConfig) -> StoreResult<Arc<dyn JobStore>> {
    let store: Arc<dyn JobStore> = match config.backend {
        JobStoreBackend::Memory => Arc::new(MemoryJobStore::new()),
        JobStoreBackend::Redis => Arc::new(RedisJobStore::new(&config.redis_url)?),
    };
    info!("Using {} job store", store.backend_name());
    Ok(store)
}
