//! Event bus abstraction
//!
//! A bus is partitioned, delivers at least once, and preserves order only
//! within a partition. Consumers acknowledge positions per partition.

pub mod memory;
pub mod nats;

use crate::error::BusError;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use memory::MemoryBus;
pub use nats::NatsBus;

/// One message read from a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub partition_id: String,
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Ordered deliveries of a single partition
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BusError>>;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Start reading `partition_id` after `resume_after` (from the beginning
    /// of retention when `None`).
    async fn subscribe(
        &self,
        partition_id: &str,
        resume_after: Option<u64>,
    ) -> Result<DeliveryStream, BusError>;

    /// Acknowledge every message of the partition up to and including `offset`.
    async fn ack_position(&self, partition_id: &str, offset: u64) -> Result<(), BusError>;
}
