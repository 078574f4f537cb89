//! Blob storage for uploaded audio.
//!
//! This crate provides:
//! - The `BlobStore` capability (put/get/delete by key)
//! - A local-disk backend for development
//! - An S3-compatible bucket backend (R2, MinIO, AWS)
//! - An in-memory backend for tests
//! - Backend selection from environment variables

pub mod blob;
pub mod client;
pub mod error;
pub mod factory;
pub mod local;
pub mod memory;

pub use blob::{upload_key, BlobStore};
pub use client::{S3BlobStore, S3Config};
pub use error::{StorageError, StorageResult};
pub use factory::{create_blob_store, BlobBackend, BlobStoreConfig};
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
