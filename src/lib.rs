//! Fraud Ingestion Pipeline Library
//!
//! Streaming ingestion of transaction events with durable, idempotent
//! persistence, per-partition checkpoints, feature derivation and online
//! scoring against a hot-swappable model.

pub mod alerting;
pub mod bus;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event_store;
pub mod feature_extractor;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod reprocess;
pub mod retry;
pub mod stage;
pub mod storage;
pub mod types;

pub use config::AppConfig;
pub use coordinator::{EventOutcome, IngestionCoordinator};
pub use event_store::{EventStore, WriteAck};
pub use feature_extractor::{FeatureExtractor, FeatureVector};
pub use models::{ModelRegistry, ScoringEngine};
pub use pipeline::Pipeline;
pub use types::{Event, PartitionPosition, PredictionResult};
