//! Alert publishing
//!
//! Operator alerts report events that could not be stored and need a manual
//! replay. Fraud alerts report predictions at or over the detection threshold.

use crate::error::AlertError;
use crate::types::alert::{FraudAlert, OperatorAlert};
use async_nats::Client;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish_operator(&self, alert: &OperatorAlert) -> Result<(), AlertError>;

    async fn publish_fraud(&self, alert: &FraudAlert) -> Result<(), AlertError>;
}

/// Publishes alerts as JSON on NATS subjects
#[derive(Clone)]
pub struct NatsAlertSink {
    client: Client,
    fraud_subject: String,
    operator_subject: String,
}

impl NatsAlertSink {
    pub fn new(client: Client, fraud_subject: &str, operator_subject: &str) -> Self {
        Self {
            client,
            fraud_subject: fraud_subject.to_string(),
            operator_subject: operator_subject.to_string(),
        }
    }

    async fn publish_json<T: serde::Serialize + Sync>(
        &self,
        subject: &str,
        alert: &T,
    ) -> Result<(), AlertError> {
        let payload =
            serde_json::to_vec(alert).map_err(|e| AlertError::Serialization(e.to_string()))?;

        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| AlertError::Publish(e.to_string()))
    }
}

#[async_trait]
impl AlertSink for NatsAlertSink {
    async fn publish_operator(&self, alert: &OperatorAlert) -> Result<(), AlertError> {
        self.publish_json(&self.operator_subject, alert).await?;
        debug!(
            alert_id = %alert.alert_id,
            kind = ?alert.kind,
            partition = %alert.partition_id,
            offset = alert.offset,
            "Published operator alert"
        );
        Ok(())
    }

    async fn publish_fraud(&self, alert: &FraudAlert) -> Result<(), AlertError> {
        self.publish_json(&self.fraud_subject, alert).await?;
        debug!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            risk_score = alert.risk_score,
            "Published fraud alert"
        );
        Ok(())
    }
}

/// Writes alerts to the log only, for dry runs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn publish_operator(&self, alert: &OperatorAlert) -> Result<(), AlertError> {
        error!(
            alert_id = %alert.alert_id,
            kind = ?alert.kind,
            partition = %alert.partition_id,
            offset = alert.offset,
            transaction_id = ?alert.transaction_id,
            reason = %alert.reason,
            "Operator alert"
        );
        Ok(())
    }

    async fn publish_fraud(&self, alert: &FraudAlert) -> Result<(), AlertError> {
        warn!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            model_version = %alert.model_version,
            risk_score = alert.risk_score,
            risk_level = ?alert.risk_level,
            "Fraud alert"
        );
        Ok(())
    }
}

/// Collects alerts in memory
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    operator: Mutex<Vec<OperatorAlert>>,
    fraud: Mutex<Vec<FraudAlert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operator_alerts(&self) -> Vec<OperatorAlert> {
        self.operator.lock().clone()
    }

    pub fn fraud_alerts(&self) -> Vec<FraudAlert> {
        self.fraud.lock().clone()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn publish_operator(&self, alert: &OperatorAlert) -> Result<(), AlertError> {
        self.operator.lock().push(alert.clone());
        Ok(())
    }

    async fn publish_fraud(&self, alert: &FraudAlert) -> Result<(), AlertError> {
        self.fraud.lock().push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::alert::{AlertKind, RiskLevelThresholds};
    use crate::types::prediction::PredictionResult;
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_sink_collects_alerts() {
        let sink = MemoryAlertSink::new();

        let operator = OperatorAlert::new(
            AlertKind::EventStoreExhausted,
            "p0",
            42,
            "retries exhausted".to_string(),
        )
        .with_transaction("T1");
        sink.publish_operator(&operator).await.unwrap();

        let prediction = PredictionResult {
            transaction_id: "T1".to_string(),
            model_version: "v1".to_string(),
            fraud_score: 0.95,
            is_fraud: true,
            scored_at: Utc::now(),
        };
        sink.publish_fraud(&FraudAlert::from_prediction(&prediction, &RiskLevelThresholds::default()))
            .await
            .unwrap();

        let operator_alerts = sink.operator_alerts();
        assert_eq!(operator_alerts.len(), 1);
        assert_eq!(operator_alerts[0].offset, 42);
        assert_eq!(operator_alerts[0].transaction_id.as_deref(), Some("T1"));
        assert_eq!(sink.fraud_alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_log_sink_never_fails() {
        let alert = OperatorAlert::new(AlertKind::CheckpointFailed, "p1", 3, "disk full".to_string());
        assert!(LogAlertSink.publish_operator(&alert).await.is_ok());
    }
}
