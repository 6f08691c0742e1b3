//! Scoring stage shared by live ingestion and reprocessing
//!
//! Derives features, scores them against the active model and persists the
//! prediction. Every failure is contained here: the event is flagged in the
//! unscored index and the caller carries on.

use crate::alerting::AlertSink;
use crate::event_store::{PredictionStore, UnscoredIndex, WriteAck};
use crate::feature_extractor::FeatureExtractor;
use crate::metrics::PipelineMetrics;
use crate::models::{ModelRegistry, ScoringEngine};
use crate::types::alert::{FraudAlert, RiskLevelThresholds};
use crate::types::event::Event;
use crate::types::prediction::PredictionResult;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of scoring one stored event
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Scored(PredictionResult),
    /// Left for the reprocessor
    Unscored { reason: String },
}

impl ScoreOutcome {
    pub fn is_scored(&self) -> bool {
        matches!(self, ScoreOutcome::Scored(_))
    }
}

pub struct ScoreStage {
    extractor: FeatureExtractor,
    schema_version: u32,
    registry: Arc<ModelRegistry>,
    scoring: ScoringEngine,
    predictions: PredictionStore,
    unscored: UnscoredIndex,
    alerts: Arc<dyn AlertSink>,
    risk_levels: RiskLevelThresholds,
    metrics: Arc<PipelineMetrics>,
}

impl ScoreStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        extractor: FeatureExtractor,
        registry: Arc<ModelRegistry>,
        scoring: ScoringEngine,
        predictions: PredictionStore,
        unscored: UnscoredIndex,
        alerts: Arc<dyn AlertSink>,
        risk_levels: RiskLevelThresholds,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            schema_version: registry.schema_version(),
            extractor,
            registry,
            scoring,
            predictions,
            unscored,
            alerts,
            risk_levels,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn unscored(&self) -> &UnscoredIndex {
        &self.unscored
    }

    /// Prediction already persisted for a transaction.
    ///
    /// A read failure is logged and treated as absent.
    pub async fn existing_prediction(&self, transaction_id: &str) -> Option<PredictionResult> {
        match self.predictions.get(transaction_id).await {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "Could not read stored prediction"
                );
                None
            }
        }
    }

    /// Score a durably stored event and persist the prediction.
    ///
    /// On failure the event is flagged unscored; this never returns an error.
    /// A fraud alert is raised only when the prediction was newly written.
    pub async fn score(&self, event: &Event) -> ScoreOutcome {
        match self.try_score(event).await {
            Ok((prediction, ack)) => {
                self.metrics.record_scored(prediction.fraud_score);
                if prediction.is_fraud && ack != WriteAck::Unchanged {
                    self.raise_fraud_alert(&prediction).await;
                }
                ScoreOutcome::Scored(prediction)
            }
            Err(reason) => {
                self.metrics.record_unscored();
                if let Err(e) = self.unscored.mark(&event.transaction_id, &reason).await {
                    error!(
                        transaction_id = %event.transaction_id,
                        error = %e,
                        "Failed to flag event for reprocessing"
                    );
                }
                ScoreOutcome::Unscored { reason }
            }
        }
    }

    async fn try_score(&self, event: &Event) -> Result<(PredictionResult, WriteAck), String> {
        let features = self
            .extractor
            .derive(event, self.schema_version)
            .map_err(|e| {
                error!(
                    transaction_id = %event.transaction_id,
                    error = %e,
                    "Feature derivation failed on a decoded event"
                );
                e.to_string()
            })?;

        let model = self.registry.current().map_err(|e| {
            warn!(transaction_id = %event.transaction_id, error = %e, "Event left unscored");
            e.to_string()
        })?;

        let prediction = self.scoring.score(&features, &model).map_err(|e| {
            warn!(
                transaction_id = %event.transaction_id,
                model_version = %model.version,
                error = %e,
                "Scoring failed, event left unscored"
            );
            e.to_string()
        })?;

        let ack = self.predictions.put(&prediction).await.map_err(|e| {
            error!(
                transaction_id = %event.transaction_id,
                error = %e,
                "Failed to persist prediction"
            );
            e.to_string()
        })?;

        debug!(
            transaction_id = %prediction.transaction_id,
            model_version = %prediction.model_version,
            fraud_score = prediction.fraud_score,
            is_fraud = prediction.is_fraud,
            "Event scored"
        );
        Ok((prediction, ack))
    }

    async fn raise_fraud_alert(&self, prediction: &PredictionResult) {
        let alert = FraudAlert::from_prediction(prediction, &self.risk_levels);
        self.metrics
            .record_alert(&format!("{:?}", alert.risk_level).to_lowercase());

        match self.alerts.publish_fraud(&alert).await {
            Ok(()) => info!(
                transaction_id = %prediction.transaction_id,
                risk_score = prediction.fraud_score,
                risk_level = ?alert.risk_level,
                "Fraud alert published"
            ),
            Err(e) => error!(
                transaction_id = %prediction.transaction_id,
                error = %e,
                "Failed to publish fraud alert"
            ),
        }
    }
}
