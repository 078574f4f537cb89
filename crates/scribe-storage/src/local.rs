//! Local disk backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::blob::{validate_key, BlobStore};
use crate::error::{StorageError, StorageResult};

/// Stores each blob as a file under a root directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create the store, creating `root` if needed.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::upload_failed(format!("Failed to create directory: {}", e)))?;
        }
        debug!("Writing {} bytes to {}", data.len(), path.display());
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StorageError::upload_failed(format!("Failed to write file: {}", e)))
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(StorageError::download_failed(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(e.to_string())),
        }
    }

    async fn ping(&self) -> StorageResult<()> {
        tokio::fs::metadata(&self.root).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
