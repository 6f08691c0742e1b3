//! Prediction result data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of scoring one transaction against one model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Scored transaction
    pub transaction_id: String,

    /// Version of the model that produced the score
    pub model_version: String,

    /// Fraud probability (0.0 - 1.0)
    pub fraud_score: f64,

    /// Whether the score reached the detection threshold
    pub is_fraud: bool,

    /// When the score was computed
    pub scored_at: DateTime<Utc>,
}
