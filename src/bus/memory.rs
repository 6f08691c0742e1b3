//! In-memory event bus
//!
//! Holds a retained log per partition. A subscription yields a snapshot of
//! the log after the resume position and then ends, which makes partition
//! workers run to completion in tests and local replays.

use super::{Delivery, DeliveryStream, EventBus};
use crate::error::BusError;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct MemoryBus {
    log: Mutex<BTreeMap<String, Vec<Delivery>>>,
    acked: Mutex<HashMap<String, u64>>,
    ack_history: Mutex<Vec<(String, u64)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at an explicit offset.
    ///
    /// Offsets must grow within a partition; redeliveries of the same payload
    /// are modelled by publishing it again at a later offset.
    pub fn publish_at(&self, partition_id: &str, offset: u64, payload: impl Into<Vec<u8>>) {
        let mut log = self.log.lock();
        let partition = log.entry(partition_id.to_string()).or_default();
        debug_assert!(partition.last().map_or(true, |last| last.offset < offset));
        partition.push(Delivery {
            partition_id: partition_id.to_string(),
            offset,
            payload: payload.into(),
        });
    }

    /// Append a message at the next offset, returning it
    pub fn publish(&self, partition_id: &str, payload: impl Into<Vec<u8>>) -> u64 {
        let next = self
            .log
            .lock()
            .get(partition_id)
            .and_then(|partition| partition.last())
            .map_or(0, |last| last.offset + 1);
        self.publish_at(partition_id, next, payload);
        next
    }

    /// Partitions that have at least one message
    pub fn partitions(&self) -> Vec<String> {
        self.log.lock().keys().cloned().collect()
    }

    /// Highest acknowledged offset of a partition
    pub fn acked(&self, partition_id: &str) -> Option<u64> {
        self.acked.lock().get(partition_id).copied()
    }

    /// Every ack call in order
    pub fn ack_history(&self) -> Vec<(String, u64)> {
        self.ack_history.lock().clone()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn subscribe(
        &self,
        partition_id: &str,
        resume_after: Option<u64>,
    ) -> Result<DeliveryStream, BusError> {
        let deliveries: Vec<Delivery> = self
            .log
            .lock()
            .get(partition_id)
            .map(|partition| {
                partition
                    .iter()
                    .filter(|d| resume_after.map_or(true, |after| d.offset > after))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(futures::stream::iter(deliveries.into_iter().map(Ok)).boxed())
    }

    async fn ack_position(&self, partition_id: &str, offset: u64) -> Result<(), BusError> {
        let mut acked = self.acked.lock();
        let current = acked.entry(partition_id.to_string()).or_insert(offset);
        *current = (*current).max(offset);
        self.ack_history.lock().push((partition_id.to_string(), offset));
        Ok(())
    }
}
