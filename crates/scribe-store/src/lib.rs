//! Job record store.
//!
//! This crate provides:
//! - The `JobStore` contract (put/get/list/delete plus compare-and-swap)
//! - A sharded in-memory backend with lazy TTL expiry
//! - A Redis backend with native key expiry
//! - Backend selection from environment variables

pub mod error;
pub mod factory;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use factory::{create_job_store, JobStoreBackend, JobStoreConfig};
pub use memory::MemoryJobStore;
pub use redis_store::RedisJobStore;
pub use store::{decode_record, encode_record, JobStore};
