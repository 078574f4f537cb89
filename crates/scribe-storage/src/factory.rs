//! Backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::blob::BlobStore;
use crate::client::S3BlobStore;
use crate::error::{StorageError, StorageResult};
use crate::local::LocalBlobStore;
use crate::memory::MemoryBlobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobBackend {
    Local,
    S3,
    Memory,
}

impl std::str::FromStr for BlobBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "disk" => Ok(BlobBackend::Local),
            "s3" | "r2" => Ok(BlobBackend::S3),
            "memory" => Ok(BlobBackend::Memory),
            other => Err(StorageError::config_error(format!("Unknown blob backend: {}", other))),
        }
    }
}

/// Blob store configuration.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    pub backend: BlobBackend,
    /// Root directory for the local backend
    pub local_root: PathBuf,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::Local,
            local_root: PathBuf::from("./data/blobs"),
        }
    }
}

impl BlobStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let backend = match std::env::var("BLOB_STORE") {
            Ok(value) => value.parse()?,
            Err(_) => BlobBackend::Local,
        };
        Ok(Self {
            backend,
            local_root: std::env::var("BLOB_LOCAL_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/blobs")),
        })
    }
}

/// Build the configured blob store.
pub async fn create_blob_store(config: &BlobStoreConfig) -> StorageResult<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.backend {
        BlobBackend::Local => Arc::new(LocalBlobStore::new(&config.local_root).await?),
        BlobBackend::S3 => Arc::new(S3BlobStore::from_env()?),
        BlobBackend::Memory => Arc::new(MemoryBlobStore::new()),
    };
    info!("Using {} blob store", store.backend_name());
    Ok(store)
}
