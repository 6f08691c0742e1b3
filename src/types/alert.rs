//! Alert data structures

use crate::types::prediction::PredictionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Configurable risk level thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.5,
            high: 0.7,
            critical: 0.9,
        }
    }
}

/// Fraud alert generated when a prediction reaches the detection threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Unique alert identifier
    pub alert_id: String,

    /// Associated transaction ID
    pub transaction_id: String,

    /// Model version that produced the score
    pub model_version: String,

    /// Fraud probability (0.0 - 1.0)
    pub risk_score: f64,

    /// Risk level classification
    pub risk_level: RiskLevel,

    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,
}

impl FraudAlert {
    /// Build an alert from a prediction
    pub fn from_prediction(prediction: &PredictionResult, thresholds: &RiskLevelThresholds) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            transaction_id: prediction.transaction_id.clone(),
            model_version: prediction.model_version.clone(),
            risk_score: prediction.fraud_score,
            risk_level: RiskLevel::from_score(prediction.fraud_score, thresholds),
            timestamp: Utc::now(),
        }
    }
}

/// What went wrong, for operator alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Raw event could not be stored after all retries; needs manual replay
    EventStoreExhausted,
    /// Checkpoint could not be committed
    CheckpointFailed,
}

/// Operator-visible alert for failures that need manual attention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub alert_id: String,
    pub kind: AlertKind,
    pub partition_id: String,
    pub offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl OperatorAlert {
    pub fn new(kind: AlertKind, partition_id: &str, offset: u64, reason: String) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            kind,
            partition_id: partition_id.to_string(),
            offset,
            transaction_id: None,
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Attach the transaction the failure belongs to
    pub fn with_transaction(mut self, transaction_id: &str) -> Self {
        self.transaction_id = Some(transaction_id.to_string());
        self
    }
}
