//! In-memory object store
//!
//! Used for tests, dry runs and local replay. Supports injecting transient
//! I/O failures so retry behaviour can be exercised.

use super::{validate_key, ObjectStore};
use crate::error::ObjectStoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Successful puts
    writes: AtomicU64,
    /// Number of upcoming operations that fail with an I/O error
    injected_failures: AtomicU32,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail with [`ObjectStoreError::Io`].
    pub fn fail_next_operations(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Number of successful writes since creation
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn check_injected_failure(&self, key: &str) -> Result<(), ObjectStoreError> {
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match consumed {
            Ok(_) => Err(ObjectStoreError::Io(format!("injected failure on {}", key))),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, overwrite: bool) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        self.check_injected_failure(key)?;

        let mut objects = self.objects.write().await;
        if !overwrite && objects.contains_key(key) {
            return Err(ObjectStoreError::AlreadyExists(key.to_string()));
        }
        objects.insert(key.to_string(), bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        validate_key(key)?;
        self.check_injected_failure(key)?;

        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        self.check_injected_failure(key)?;

        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        self.check_injected_failure(prefix)?;

        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
