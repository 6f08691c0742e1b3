//! Object store abstraction
//!
//! The pipeline only needs key → bytes semantics: put (with or without
//! overwrite), get with a distinguishable not-found, and for reprocessing,
//! delete and prefix listing. There are no transactions.

pub mod fs;
pub mod memory;

use crate::error::ObjectStoreError;
use async_trait::async_trait;

pub use fs::FsObjectStore;

/// Key segments starting with this are reserved for in-flight writes
pub const RESERVED_SEGMENT_PREFIX: &str = ".tmp-";
pub use memory::MemoryObjectStore;

/// Durable key → bytes store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` at `key`. With `overwrite = false` an existing object
    /// yields [`ObjectStoreError::AlreadyExists`].
    async fn put(&self, key: &str, bytes: Vec<u8>, overwrite: bool) -> Result<(), ObjectStoreError>;

    /// Read the object at `key`, [`ObjectStoreError::NotFound`] when absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Remove the object at `key`. Removing a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;
}

/// Reject keys that could escape the store namespace.
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| {
                segment.is_empty()
                    || segment == "."
                    || segment == ".."
                    || segment.starts_with(RESERVED_SEGMENT_PREFIX)
            });

    if bad {
        Err(ObjectStoreError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}
