//! Transaction event data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A validated financial-transaction event.
///
/// `transaction_id` is the idempotency key for storage and duplicate
/// suppression. Fields not known to the pipeline are kept verbatim in
/// `raw_fields` so a stored event round-trips to the payload it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique transaction identifier
    pub transaction_id: String,

    /// Transaction amount in currency units (non-negative)
    pub amount: f64,

    /// When the transaction happened
    pub timestamp: DateTime<Utc>,

    /// Account owner, empty when the producer did not send one
    #[serde(default)]
    pub user_id: String,

    /// Every other top-level field of the payload
    #[serde(flatten)]
    pub raw_fields: BTreeMap<String, Value>,
}

impl Event {
    /// Create an event with the required fields
    pub fn new(transaction_id: impl Into<String>, amount: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            amount,
            timestamp,
            user_id: String::new(),
            raw_fields: BTreeMap::new(),
        }
    }

    /// Set the user id
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Attach an extra payload field
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.raw_fields.insert(name.into(), value);
        self
    }
}

/// Position of a message on a bus partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionPosition {
    pub partition_id: String,
    pub offset: u64,
}

impl PartitionPosition {
    pub fn new(partition_id: impl Into<String>, offset: u64) -> Self {
        Self {
            partition_id: partition_id.into(),
            offset,
        }
    }
}
