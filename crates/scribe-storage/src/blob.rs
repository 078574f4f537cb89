//! The blob storage capability.

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// Opaque put/get/delete of binary content by key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> StorageResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Key for an uploaded file: `uploads/{job_id}-{filename}`.
///
/// Only the final path component of `filename` is kept.
pub fn upload_key(job_id: &str, filename: &str) -> String {
    let name = filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);
    format!("uploads/{}-{}", job_id, name)
}

/// Reject keys that could escape a storage root.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part == ".." || part.is_empty())
    {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}
