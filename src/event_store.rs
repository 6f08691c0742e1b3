//! Idempotent persistence of events, predictions and reprocessing markers.
//!
//! Every record is keyed by transaction id. Writing identical content again is
//! a no-op; different content for the same key replaces it (last writer wins).
//! Transient object-store failures are retried under the configured
//! [`RetryPolicy`] and every call is bounded by the I/O timeout.

use crate::codec;
use crate::error::{ObjectStoreError, StoreError};
use crate::retry::RetryPolicy;
use crate::storage::ObjectStore;
use crate::types::event::Event;
use crate::types::prediction::PredictionResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const EVENTS_PREFIX: &str = "events/";
pub const PREDICTIONS_PREFIX: &str = "predictions/";
pub const UNSCORED_PREFIX: &str = "unscored/";

/// Outcome of an idempotent write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAck {
    /// Nothing was stored under the key before
    Created,
    /// Identical content was already stored, nothing written
    Unchanged,
    /// Different content was replaced
    Overwritten,
}

/// Write/read helper implementing the idempotent-write contract
#[derive(Clone)]
pub struct IdempotentWriter {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl IdempotentWriter {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            store,
            retry,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Store `bytes` at `key` unless identical bytes are already there.
    pub async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<WriteAck, StoreError> {
        let bytes = bytes.as_slice();
        self.retry
            .run(key, move || self.write_once(key, bytes))
            .await
    }

    /// Read `key`, `None` when absent.
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.retry
            .run(key, move || async move {
                match self.call(key, self.store.get(key)).await {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(e) if is_not_found(&e) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Delete `key`; deleting a missing key succeeds.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.retry
            .run(key, move || self.call(key, self.store.delete(key)))
            .await
    }

    /// Keys below `prefix`
    pub async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.retry
            .run(prefix, move || self.call(prefix, self.store.list(prefix)))
            .await
    }

    async fn write_once(&self, key: &str, bytes: &[u8]) -> Result<WriteAck, StoreError> {
        let ack = match self.call(key, self.store.get(key)).await {
            Ok(existing) if existing == bytes => return Ok(WriteAck::Unchanged),
            Ok(_) => WriteAck::Overwritten,
            Err(e) if is_not_found(&e) => WriteAck::Created,
            Err(e) => return Err(e),
        };

        self.call(key, self.store.put(key, bytes.to_vec(), true))
            .await?;
        Ok(ack)
    }

    async fn call<T>(
        &self,
        key: &str,
        operation: impl Future<Output = Result<T, ObjectStoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(StoreError::Backend {
                key: key.to_string(),
                source,
            }),
            Err(_) => Err(StoreError::Timeout {
                key: key.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

fn is_not_found(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Backend {
            source: ObjectStoreError::NotFound(_),
            ..
        }
    )
}

/// Durable log of raw events at `events/{transaction_id}`
#[derive(Clone)]
pub struct EventStore {
    writer: IdempotentWriter,
}

impl EventStore {
    pub fn new(writer: IdempotentWriter) -> Self {
        Self { writer }
    }

    pub fn key_for(transaction_id: &str) -> String {
        format!("{}{}", EVENTS_PREFIX, transaction_id)
    }

    /// Persist an event. Replays of the same event are no-ops.
    pub async fn put(&self, event: &Event) -> Result<WriteAck, StoreError> {
        let key = Self::key_for(&event.transaction_id);
        let bytes = codec::encode(event).map_err(|e| StoreError::Serialization {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let ack = self.writer.write(&key, bytes).await?;
        match ack {
            WriteAck::Overwritten => warn!(
                transaction_id = %event.transaction_id,
                "Stored event replaced with different content (last writer wins)"
            ),
            _ => debug!(transaction_id = %event.transaction_id, ack = ?ack, "Event persisted"),
        }

        Ok(ack)
    }

    /// Load a stored event
    pub async fn get(&self, transaction_id: &str) -> Result<Option<Event>, StoreError> {
        let key = Self::key_for(transaction_id);
        match self.writer.read(&key).await? {
            Some(bytes) => codec::decode(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key,
                    reason: e.reason(),
                }),
            None => Ok(None),
        }
    }
}

/// Predictions at `predictions/{transaction_id}`
#[derive(Clone)]
pub struct PredictionStore {
    writer: IdempotentWriter,
}

impl PredictionStore {
    pub fn new(writer: IdempotentWriter) -> Self {
        Self { writer }
    }

    pub fn key_for(transaction_id: &str) -> String {
        format!("{}{}", PREDICTIONS_PREFIX, transaction_id)
    }

    pub async fn put(&self, prediction: &PredictionResult) -> Result<WriteAck, StoreError> {
        let key = Self::key_for(&prediction.transaction_id);
        let bytes = serde_json::to_vec(prediction).map_err(|e| StoreError::Serialization {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.writer.write(&key, bytes).await
    }

    pub async fn get(&self, transaction_id: &str) -> Result<Option<PredictionResult>, StoreError> {
        let key = Self::key_for(transaction_id);
        match self.writer.read(&key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}

/// Why an event was left unscored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnscoredMarker {
    pub transaction_id: String,
    pub reason: String,
}

/// Events stored but not scored, at `unscored/{transaction_id}`
#[derive(Clone)]
pub struct UnscoredIndex {
    writer: IdempotentWriter,
}

impl UnscoredIndex {
    pub fn new(writer: IdempotentWriter) -> Self {
        Self { writer }
    }

    pub fn key_for(transaction_id: &str) -> String {
        format!("{}{}", UNSCORED_PREFIX, transaction_id)
    }

    /// Flag an event for reprocessing
    pub async fn mark(&self, transaction_id: &str, reason: &str) -> Result<WriteAck, StoreError> {
        let key = Self::key_for(transaction_id);
        let marker = UnscoredMarker {
            transaction_id: transaction_id.to_string(),
            reason: reason.to_string(),
        };
        let bytes = serde_json::to_vec(&marker).map_err(|e| StoreError::Serialization {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.writer.write(&key, bytes).await
    }

    /// Remove the flag once the event is scored
    pub async fn clear(&self, transaction_id: &str) -> Result<(), StoreError> {
        self.writer.remove(&Self::key_for(transaction_id)).await
    }

    /// Transaction ids currently flagged
    pub async fn pending(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .writer
            .keys(UNSCORED_PREFIX)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(UNSCORED_PREFIX).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use chrono::{TimeZone, Utc};

    fn writer(store: Arc<MemoryObjectStore>) -> IdempotentWriter {
        IdempotentWriter::new(store, RetryPolicy::immediate(3), Duration::from_secs(1))
    }

    fn event(id: &str, amount: f64) -> Event {
        Event::new(id, amount, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()).with_user("U1")
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = Arc::new(MemoryObjectStore::new());
        let events = EventStore::new(writer(store.clone()));
        let e = event("T1", 1500.0);

        assert_eq!(events.put(&e).await.unwrap(), WriteAck::Created);
        let bytes_after_first = store.get("events/T1").await.unwrap();

        assert_eq!(events.put(&e).await.unwrap(), WriteAck::Unchanged);

        assert_eq!(store.write_count(), 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("events/T1").await.unwrap(), bytes_after_first);
        assert_eq!(events.get("T1").await.unwrap(), Some(e));
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let store = Arc::new(MemoryObjectStore::new());
        let events = EventStore::new(writer(store.clone()));

        events.put(&event("T1", 10.0)).await.unwrap();
        let ack = events.put(&event("T1", 12.5)).await.unwrap();

        assert_eq!(ack, WriteAck::Overwritten);
        assert_eq!(events.get("T1").await.unwrap().unwrap().amount, 12.5);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(MemoryObjectStore::new());
        let events = EventStore::new(writer(store.clone()));

        store.fail_next_operations(2);
        assert_eq!(events.put(&event("T1", 1.0)).await.unwrap(), WriteAck::Created);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_fatal_error() {
        let store = Arc::new(MemoryObjectStore::new());
        let events = EventStore::new(writer(store.clone()));

        store.fail_next_operations(3);
        let err = events.put(&event("T1", 1.0)).await.unwrap_err();

        assert!(matches!(err, StoreError::RetryExhausted { attempts: 3, .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_events() {
        let store = Arc::new(MemoryObjectStore::new());
        let events = EventStore::new(writer(store.clone()));

        assert_eq!(events.get("nope").await.unwrap(), None);

        store.put("events/bad", b"{\"garbage\":true}".to_vec(), true).await.unwrap();
        assert!(matches!(events.get("bad").await, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_prediction_store_round_trip() {
        let store = Arc::new(MemoryObjectStore::new());
        let predictions = PredictionStore::new(writer(store));
        let prediction = PredictionResult {
            transaction_id: "T1".to_string(),
            model_version: "v1".to_string(),
            fraud_score: 0.25,
            is_fraud: false,
            scored_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 1).unwrap(),
        };

        assert_eq!(predictions.put(&prediction).await.unwrap(), WriteAck::Created);
        assert_eq!(predictions.put(&prediction).await.unwrap(), WriteAck::Unchanged);
        assert_eq!(predictions.get("T1").await.unwrap(), Some(prediction));
    }

    #[tokio::test]
    async fn test_unscored_index() {
        let store = Arc::new(MemoryObjectStore::new());
        let index = UnscoredIndex::new(writer(store));

        index.mark("T2", "schema mismatch").await.unwrap();
        index.mark("T1", "no active model").await.unwrap();
        assert_eq!(index.mark("T1", "no active model").await.unwrap(), WriteAck::Unchanged);

        assert_eq!(index.pending().await.unwrap(), vec!["T1".to_string(), "T2".to_string()]);

        index.clear("T1").await.unwrap();
        assert_eq!(index.pending().await.unwrap(), vec!["T2".to_string()]);
    }
}
