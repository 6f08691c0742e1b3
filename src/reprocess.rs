//! Scores events that were stored but left unscored
//!
//! Runs after a model is activated. Each flagged event is read back from the
//! event store and sent through the scoring stage again; the flag is cleared
//! once a prediction is persisted.

use crate::error::StoreError;
use crate::event_store::EventStore;
use crate::metrics::PipelineMetrics;
use crate::stage::{ScoreOutcome, ScoreStage};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Counts from one reprocessing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReprocessSummary {
    pub scored: usize,
    pub still_unscored: usize,
    /// Flags whose event is no longer in the store
    pub missing: usize,
    /// Flags skipped this pass because the store could not serve them
    pub failed: usize,
}

pub struct Reprocessor {
    events: EventStore,
    stage: Arc<ScoreStage>,
    metrics: Arc<PipelineMetrics>,
    /// One pass at a time
    running: Mutex<()>,
}

impl Reprocessor {
    pub fn new(events: EventStore, stage: Arc<ScoreStage>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            events,
            stage,
            metrics,
            running: Mutex::new(()),
        }
    }

    /// Try to score every flagged event once
    pub async fn run_once(&self) -> Result<ReprocessSummary, StoreError> {
        let _guard = self.running.lock().await;
        let mut summary = ReprocessSummary::default();

        if self.stage.registry().current().is_err() {
            summary.still_unscored = self.stage.unscored().pending().await?.len();
            return Ok(summary);
        }

        for transaction_id in self.stage.unscored().pending().await? {
            match self.reprocess_one(&transaction_id).await {
                Ok(Reprocessed::Scored) => {
                    self.metrics.record_reprocessed();
                    summary.scored += 1;
                }
                Ok(Reprocessed::StillUnscored) => summary.still_unscored += 1,
                Ok(Reprocessed::Missing) => summary.missing += 1,
                Err(e) => {
                    error!(
                        transaction_id = %transaction_id,
                        error = %e,
                        "Reprocessing failed, flag kept for the next pass"
                    );
                    summary.failed += 1;
                }
            }
        }

        if summary != ReprocessSummary::default() {
            info!(
                scored = summary.scored,
                still_unscored = summary.still_unscored,
                missing = summary.missing,
                failed = summary.failed,
                "Reprocessing pass finished"
            );
        }
        Ok(summary)
    }

    async fn reprocess_one(&self, transaction_id: &str) -> Result<Reprocessed, StoreError> {
        let Some(event) = self.events.get(transaction_id).await? else {
            warn!(transaction_id = %transaction_id, "Unscored flag without stored event, dropping it");
            self.stage.unscored().clear(transaction_id).await?;
            return Ok(Reprocessed::Missing);
        };

        // Scored before the flag could be cleared
        if self.stage.existing_prediction(transaction_id).await.is_some() {
            self.stage.unscored().clear(transaction_id).await?;
            return Ok(Reprocessed::Scored);
        }

        match self.stage.score(&event).await {
            ScoreOutcome::Scored(_) => {
                self.stage.unscored().clear(transaction_id).await?;
                Ok(Reprocessed::Scored)
            }
            ScoreOutcome::Unscored { .. } => Ok(Reprocessed::StillUnscored),
        }
    }
}

enum Reprocessed {
    Scored,
    StillUnscored,
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::MemoryAlertSink;
    use crate::event_store::{IdempotentWriter, PredictionStore, UnscoredIndex};
    use crate::feature_extractor::FeatureExtractor;
    use crate::models::{publish_model, ModelMetadata, ModelRegistry, ScoringEngine, StoreModelSource};
    use crate::retry::RetryPolicy;
    use crate::storage::{MemoryObjectStore, ObjectStore};
    use crate::types::alert::RiskLevelThresholds;
    use crate::types::event::Event;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryObjectStore>, EventStore, PredictionStore, Arc<ScoreStage>, Reprocessor) {
        let store = Arc::new(MemoryObjectStore::new());
        let writer = IdempotentWriter::new(store.clone(), RetryPolicy::immediate(3), Duration::from_secs(1));
        let metrics = Arc::new(PipelineMetrics::new());
        let stage = Arc::new(ScoreStage::new(
            FeatureExtractor::default(),
            Arc::new(ModelRegistry::new(1)),
            ScoringEngine::new(0.5),
            PredictionStore::new(writer.clone()),
            UnscoredIndex::new(writer.clone()),
            Arc::new(MemoryAlertSink::new()),
            RiskLevelThresholds::default(),
            metrics.clone(),
        ));
        let events = EventStore::new(writer.clone());
        let reprocessor = Reprocessor::new(events.clone(), stage.clone(), metrics);
        (store, events, PredictionStore::new(writer), stage, reprocessor)
    }

    #[tokio::test]
    async fn test_flagged_events_scored_after_model_load() {
        let (store, events, predictions, stage, reprocessor) = setup();
        let event = Event::new("T1", 1500.0, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());

        events.put(&event).await.unwrap();
        assert!(!stage.score(&event).await.is_scored());

        let before = reprocessor.run_once().await.unwrap();
        assert_eq!(before.still_unscored, 1);

        let metadata = ModelMetadata {
            version: "v1".to_string(),
            expected_feature_schema_version: 1,
            format: "logistic".to_string(),
        };
        publish_model(store.as_ref(), &metadata, br#"{"bias": 0.0, "coefficients": {}}"#, true)
            .await
            .unwrap();
        stage
            .registry()
            .reload(&StoreModelSource::latest(store.clone(), Duration::from_secs(1)))
            .await
            .unwrap();

        let after = reprocessor.run_once().await.unwrap();
        assert_eq!(after, ReprocessSummary { scored: 1, still_unscored: 0, missing: 0, failed: 0 });
        assert!(stage.unscored().pending().await.unwrap().is_empty());
        assert_eq!(predictions.get("T1").await.unwrap().unwrap().model_version, "v1");
    }

    #[tokio::test]
    async fn test_flag_without_event_is_dropped() {
        let (store, _events, _predictions, stage, reprocessor) = setup();
        let metadata = ModelMetadata {
            version: "v1".to_string(),
            expected_feature_schema_version: 1,
            format: "logistic".to_string(),
        };
        publish_model(store.as_ref(), &metadata, br#"{"bias": 0.0, "coefficients": {}}"#, true)
            .await
            .unwrap();
        stage
            .registry()
            .reload(&StoreModelSource::latest(store.clone(), Duration::from_secs(1)))
            .await
            .unwrap();

        stage.unscored().mark("ghost", "no active model").await.unwrap();

        let summary = reprocessor.run_once().await.unwrap();
        assert_eq!(summary.missing, 1);
        assert!(stage.unscored().pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_event_does_not_block_later_flags() {
        let (store, events, predictions, stage, reprocessor) = setup();
        let metadata = ModelMetadata {
            version: "v1".to_string(),
            expected_feature_schema_version: 1,
            format: "logistic".to_string(),
        };
        publish_model(store.as_ref(), &metadata, br#"{"bias": 0.0, "coefficients": {}}"#, true)
            .await
            .unwrap();
        stage
            .registry()
            .reload(&StoreModelSource::latest(store.clone(), Duration::from_secs(1)))
            .await
            .unwrap();

        // A sorts before B and cannot be decoded
        store.put("events/A", b"garbage".to_vec(), true).await.unwrap();
        let valid = Event::new("B", 20.0, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        events.put(&valid).await.unwrap();
        stage.unscored().mark("A", "no active model").await.unwrap();
        stage.unscored().mark("B", "no active model").await.unwrap();

        for _ in 0..2 {
            let summary = reprocessor.run_once().await.unwrap();
            assert_eq!(summary.failed, 1);
        }

        assert!(predictions.get("B").await.unwrap().is_some());
        assert_eq!(stage.unscored().pending().await.unwrap(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_flag_with_existing_prediction_is_cleared_without_rescoring() {
        let (store, events, predictions, stage, reprocessor) = setup();
        let metadata = ModelMetadata {
            version: "v1".to_string(),
            expected_feature_schema_version: 1,
            format: "logistic".to_string(),
        };
        publish_model(store.as_ref(), &metadata, br#"{"bias": 0.0, "coefficients": {}}"#, true)
            .await
            .unwrap();
        stage
            .registry()
            .reload(&StoreModelSource::latest(store.clone(), Duration::from_secs(1)))
            .await
            .unwrap();

        let event = Event::new("T1", 20.0, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        events.put(&event).await.unwrap();
        let ScoreOutcome::Scored(first) = stage.score(&event).await else {
            panic!("expected a prediction");
        };
        stage.unscored().mark("T1", "flag left behind").await.unwrap();

        let summary = reprocessor.run_once().await.unwrap();
        assert_eq!(summary.scored, 1);
        assert_eq!(predictions.get("T1").await.unwrap().unwrap(), first);
        assert!(stage.unscored().pending().await.unwrap().is_empty());
    }
}
