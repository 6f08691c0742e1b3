//! Per-partition checkpoint management
//!
//! A partition moves from `Uncommitted(offset)` to `Committed(offset)` once
//! the checkpoint record is durable. Offsets only move forward: an advance
//! below the committed offset is ignored.

use crate::bus::EventBus;
use crate::error::{CheckpointError, StoreError};
use crate::event_store::IdempotentWriter;
use crate::types::event::PartitionPosition;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CHECKPOINTS_PREFIX: &str = "checkpoints/";

/// Checkpoint state of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// An advance to this offset started but is not durable yet
    Uncommitted(u64),
    Committed(u64),
}

/// Persisted form at `checkpoints/{partition_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub partition_id: String,
    pub offset: u64,
    pub committed_at: DateTime<Utc>,
}

/// Result of [`CheckpointManager::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Committed(u64),
    /// The offset was not above the committed one; nothing changed
    Ignored { committed: u64 },
}

#[derive(Debug, Default)]
struct PartitionSlot {
    loaded: bool,
    /// Highest durable offset
    committed: Option<u64>,
    state: Option<PartitionState>,
}

pub struct CheckpointManager {
    writer: IdempotentWriter,
    bus: Arc<dyn EventBus>,
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<PartitionSlot>>>>,
}

impl CheckpointManager {
    pub fn new(writer: IdempotentWriter, bus: Arc<dyn EventBus>) -> Self {
        Self {
            writer,
            bus,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_for(partition_id: &str) -> String {
        format!("{}{}", CHECKPOINTS_PREFIX, partition_id)
    }

    /// Commit `offset` for `partition_id`.
    ///
    /// The record is persisted first and acknowledged on the bus second. If
    /// persisting fails the partition stays `Uncommitted(offset)` and the
    /// error is returned; a later advance commits a higher offset.
    pub async fn advance(
        &self,
        partition_id: &str,
        offset: u64,
    ) -> Result<AdvanceOutcome, CheckpointError> {
        let slot = self.slot(partition_id);
        let mut slot = slot.lock().await;
        self.ensure_loaded(partition_id, &mut slot).await?;

        if let Some(committed) = slot.committed {
            if offset <= committed {
                debug!(
                    partition = %partition_id,
                    offset = offset,
                    committed = committed,
                    "Ignoring stale checkpoint advance"
                );
                return Ok(AdvanceOutcome::Ignored { committed });
            }
        }

        slot.state = Some(PartitionState::Uncommitted(offset));

        let key = Self::key_for(partition_id);
        let record = CheckpointRecord {
            partition_id: partition_id.to_string(),
            offset,
            committed_at: Utc::now(),
        };
        let persist_error = |source: StoreError| CheckpointError::Persist {
            partition_id: partition_id.to_string(),
            source,
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| {
            persist_error(StoreError::Serialization {
                key: key.clone(),
                reason: e.to_string(),
            })
        })?;
        self.writer.write(&key, bytes).await.map_err(persist_error)?;

        slot.committed = Some(offset);
        slot.state = Some(PartitionState::Committed(offset));

        // Resume reads the persisted record, so a failed bus ack only means
        // the broker may redeliver what the event store already holds.
        self.bus
            .ack_position(partition_id, offset)
            .await
            .map_err(|source| CheckpointError::Ack {
                partition_id: partition_id.to_string(),
                source,
            })?;

        debug!(partition = %partition_id, offset = offset, "Checkpoint committed");
        Ok(AdvanceOutcome::Committed(offset))
    }

    /// Last committed offset known in memory
    pub async fn committed(&self, partition_id: &str) -> Option<u64> {
        let slot = self.slot(partition_id);
        let slot = slot.lock().await;
        slot.committed
    }

    pub async fn state(&self, partition_id: &str) -> Option<PartitionState> {
        let slot = self.slot(partition_id);
        let slot = slot.lock().await;
        slot.state
    }

    /// Position to resume from after a restart, loading the persisted
    /// record on first access.
    pub async fn resume_position(
        &self,
        partition_id: &str,
    ) -> Result<Option<PartitionPosition>, CheckpointError> {
        let slot = self.slot(partition_id);
        let mut slot = slot.lock().await;
        self.ensure_loaded(partition_id, &mut slot).await?;
        Ok(slot
            .committed
            .map(|offset| PartitionPosition::new(partition_id, offset)))
    }

    fn slot(&self, partition_id: &str) -> Arc<tokio::sync::Mutex<PartitionSlot>> {
        self.slots
            .lock()
            .entry(partition_id.to_string())
            .or_default()
            .clone()
    }

    async fn ensure_loaded(
        &self,
        partition_id: &str,
        slot: &mut PartitionSlot,
    ) -> Result<(), CheckpointError> {
        if slot.loaded {
            return Ok(());
        }

        let key = Self::key_for(partition_id);
        let load_error = |source: StoreError| CheckpointError::Load {
            partition_id: partition_id.to_string(),
            source,
        };

        let record = match self.writer.read(&key).await.map_err(load_error)? {
            Some(bytes) => Some(
                serde_json::from_slice::<CheckpointRecord>(&bytes).map_err(|e| {
                    load_error(StoreError::Corrupt {
                        key: key.clone(),
                        reason: e.to_string(),
                    })
                })?,
            ),
            None => None,
        };

        if let Some(record) = &record {
            if record.partition_id != partition_id {
                warn!(
                    partition = %partition_id,
                    recorded = %record.partition_id,
                    "Checkpoint record names a different partition"
                );
            }
            debug!(partition = %partition_id, offset = record.offset, "Loaded checkpoint");
        }

        slot.committed = record.map(|r| r.offset);
        slot.state = slot.committed.map(PartitionState::Committed);
        slot.loaded = true;
        Ok(())
    }
}
