//! Error taxonomy for the ingestion pipeline.
//!
//! Each component owns one error enum. The coordinator isolates all of them to
//! the event that produced them; only [`StoreError`] on the raw event blocks
//! checkpoint advancement.

use thiserror::Error;

/// Malformed bus payload. The message is logged and skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DecodeError {
    /// Human readable rejection reason
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Failure reported by an object store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object store I/O failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for ObjectStoreError {
    fn from(err: std::io::Error) -> Self {
        ObjectStoreError::Io(err.to_string())
    }
}

/// Failure of an idempotent write or read against the object store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object store failure on `{key}`: {source}")]
    Backend {
        key: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("object store call on `{key}` timed out after {timeout_ms} ms")]
    Timeout { key: String, timeout_ms: u64 },

    #[error("failed to serialize record for `{key}`: {reason}")]
    Serialization { key: String, reason: String },

    #[error("stored record at `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

impl StoreError {
    /// Whether another attempt could succeed.
    ///
    /// Serialization and corruption problems are deterministic and are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Backend { source, .. } => matches!(source, ObjectStoreError::Io(_)),
            StoreError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Source fields missing or invalid after decode. Indicates a codec bug.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("event `{transaction_id}` is missing required field `{field}`")]
    MissingField {
        transaction_id: String,
        field: &'static str,
    },

    #[error("event `{transaction_id}` has invalid `{field}`: {reason}")]
    InvalidField {
        transaction_id: String,
        field: &'static str,
        reason: String,
    },

    #[error("unsupported feature schema version {0}")]
    UnsupportedSchema(u32),
}

/// Model artifact could not become the active model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("no model has been loaded yet")]
    NoActiveModel,

    #[error("model {version} expects feature schema v{expected}, engine produces v{actual}")]
    SchemaMismatch {
        version: String,
        expected: u32,
        actual: u32,
    },

    #[error("model artifact `{0}` not found")]
    NotFound(String),

    #[error("model artifact fetch failed: {0}")]
    Fetch(String),

    #[error("model artifact fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("invalid model metadata: {0}")]
    InvalidMetadata(String),

    #[error("unsupported model format `{0}`")]
    UnsupportedFormat(String),

    #[error("model runtime rejected artifact {version}: {reason}")]
    Runtime { version: String, reason: String },
}

impl LoadError {
    /// Whether loading the same artifact again could succeed.
    ///
    /// Incompatible or unreadable artifacts fail the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LoadError::NotFound(_) | LoadError::Fetch(_) | LoadError::Timeout(_)
        )
    }
}

/// Scoring did not produce a usable prediction. The event stays unscored.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("feature schema v{features} does not match model {model_version} (expects v{expected})")]
    SchemaMismatch {
        model_version: String,
        expected: u32,
        features: u32,
    },

    #[error("model {model_version} failed to score: {reason}")]
    Runtime {
        model_version: String,
        reason: String,
    },

    #[error("model {model_version} produced out-of-range score {score}")]
    InvalidScore { model_version: String, score: f64 },
}

/// Message broker failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),

    #[error("subscription to partition {partition_id} failed: {reason}")]
    Subscribe { partition_id: String, reason: String },

    #[error("delivery from partition {partition_id} failed: {reason}")]
    Delivery { partition_id: String, reason: String },

    #[error("ack of partition {partition_id} at offset {offset} failed: {reason}")]
    Ack {
        partition_id: String,
        offset: u64,
        reason: String,
    },

    #[error("unknown partition {0}")]
    UnknownPartition(String),
}

/// Checkpoint could not be committed. The partition stays uncommitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("failed to load checkpoint for partition {partition_id}: {source}")]
    Load {
        partition_id: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to persist checkpoint for partition {partition_id}: {source}")]
    Persist {
        partition_id: String,
        #[source]
        source: StoreError,
    },

    #[error("bus rejected checkpoint for partition {partition_id}: {source}")]
    Ack {
        partition_id: String,
        #[source]
        source: BusError,
    },
}

/// A partition worker stopped before its stream ended or shutdown was requested.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("worker for partition {partition_id} panicked: {reason}")]
    Panicked { partition_id: String, reason: String },
}

/// Alert could not be delivered to the operator channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("failed to serialize alert: {0}")]
    Serialization(String),

    #[error("failed to publish alert: {0}")]
    Publish(String),
}
