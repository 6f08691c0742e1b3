//! Type definitions for the ingestion pipeline

pub mod alert;
pub mod event;
pub mod prediction;

pub use alert::{AlertKind, FraudAlert, OperatorAlert, RiskLevel, RiskLevelThresholds};
pub use event::{Event, PartitionPosition};
pub use prediction::PredictionResult;
