//! Component wiring
//!
//! Builds every component from an [`AppConfig`] around the given object
//! store, bus and alert sink.

use crate::alerting::AlertSink;
use crate::bus::EventBus;
use crate::checkpoint::CheckpointManager;
use crate::config::AppConfig;
use crate::coordinator::IngestionCoordinator;
use crate::event_store::{EventStore, IdempotentWriter, PredictionStore, UnscoredIndex};
use crate::feature_extractor::FeatureExtractor;
use crate::metrics::PipelineMetrics;
use crate::models::{ModelRegistry, ModelWatcher, ScoringEngine, StoreModelSource};
use crate::reprocess::Reprocessor;
use crate::stage::ScoreStage;
use crate::storage::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Pipeline {
    pub coordinator: Arc<IngestionCoordinator>,
    pub registry: Arc<ModelRegistry>,
    pub reprocessor: Arc<Reprocessor>,
    pub model_source: StoreModelSource,
    pub metrics: Arc<PipelineMetrics>,
    poll_interval: Duration,
    reprocess_on_reload: bool,
}

impl Pipeline {
    pub fn build(
        config: &AppConfig,
        store: Arc<dyn ObjectStore>,
        bus: Arc<dyn EventBus>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let timeout = config.store.io_timeout();
        let writer = IdempotentWriter::new(store.clone(), config.store.retry.clone(), timeout);
        let metrics = Arc::new(PipelineMetrics::new());
        let registry = Arc::new(
            ModelRegistry::new(config.features.schema_version)
                .with_onnx_threads(config.models.onnx_threads),
        );

        let stage = Arc::new(ScoreStage::new(
            FeatureExtractor::new(config.features.high_value_threshold),
            registry.clone(),
            ScoringEngine::new(config.detection.threshold),
            PredictionStore::new(writer.clone()),
            UnscoredIndex::new(writer.clone()),
            alerts.clone(),
            config.detection.risk_levels.clone(),
            metrics.clone(),
        ));

        let events = EventStore::new(writer.clone());
        let checkpoints = Arc::new(CheckpointManager::new(writer, bus.clone()));
        let reprocessor = Arc::new(Reprocessor::new(events.clone(), stage.clone(), metrics.clone()));

        let coordinator = Arc::new(
            IngestionCoordinator::new(bus, events, stage, checkpoints, alerts, metrics.clone())
                .with_milestone_every(config.pipeline.milestone_every),
        );

        Self {
            coordinator,
            registry,
            reprocessor,
            model_source: StoreModelSource::latest(store, timeout),
            metrics,
            poll_interval: Duration::from_secs(config.models.poll_interval_secs.max(1)),
            reprocess_on_reload: config.models.reprocess_on_reload,
        }
    }

    /// Load the published model if there is one. Without a model the
    /// pipeline still ingests; events stay unscored until a reload.
    pub async fn bootstrap_model(&self) {
        match self.registry.reload(&self.model_source).await {
            Ok(outcome) => info!(model_version = %outcome.version, "Initial model loaded"),
            Err(e) => warn!(error = %e, "Starting without an active model"),
        }
    }

    /// Watcher that rolls out newly published models
    pub fn model_watcher(&self) -> ModelWatcher {
        let watcher = ModelWatcher::new(self.registry.clone(), self.model_source.clone(), self.poll_interval);
        if self.reprocess_on_reload {
            watcher.with_reprocessor(self.reprocessor.clone())
        } else {
            watcher
        }
    }
}
