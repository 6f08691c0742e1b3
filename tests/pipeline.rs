//! End-to-end pipeline scenarios over the in-memory store, bus and alert sink.

use chrono::{TimeZone, Utc};
use fraud_ingestion_pipeline::alerting::MemoryAlertSink;
use fraud_ingestion_pipeline::bus::{Delivery, MemoryBus};
use fraud_ingestion_pipeline::checkpoint::PartitionState;
use fraud_ingestion_pipeline::config::AppConfig;
use fraud_ingestion_pipeline::error::{LoadError, StoreError};
use fraud_ingestion_pipeline::event_store::{IdempotentWriter, PredictionStore, WriteAck, EVENTS_PREFIX};
use fraud_ingestion_pipeline::models::registry::{publish_model, ModelMetadata};
use fraud_ingestion_pipeline::retry::RetryPolicy;
use fraud_ingestion_pipeline::storage::{MemoryObjectStore, ObjectStore};
use fraud_ingestion_pipeline::types::AlertKind;
use fraud_ingestion_pipeline::{Event, EventOutcome, FeatureExtractor, Pipeline};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const FRAUD_WEIGHTS: &[u8] = br#"{"bias": -4.0, "coefficients": {"high_transaction": 5.0}}"#;

struct Harness {
    store: Arc<MemoryObjectStore>,
    bus: Arc<MemoryBus>,
    alerts: Arc<MemoryAlertSink>,
    pipeline: Pipeline,
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.store.retry = RetryPolicy::immediate(3);
    config.store.io_timeout_ms = 1_000;
    config.bus.partitions = vec!["p0".to_string()];
    config
}

fn harness() -> Harness {
    harness_over(Arc::new(MemoryObjectStore::new()), Arc::new(MemoryBus::new()))
}

fn harness_over(store: Arc<MemoryObjectStore>, bus: Arc<MemoryBus>) -> Harness {
    let alerts = Arc::new(MemoryAlertSink::new());
    let pipeline = Pipeline::build(&test_config(), store.clone(), bus.clone(), alerts.clone());
    Harness {
        store,
        bus,
        alerts,
        pipeline,
    }
}

fn metadata(version: &str, schema: u32) -> ModelMetadata {
    ModelMetadata {
        version: version.to_string(),
        expected_feature_schema_version: schema,
        format: "logistic".to_string(),
    }
}

fn payload(transaction_id: &str, amount: f64, timestamp: &str) -> Vec<u8> {
    json!({
        "transaction_id": transaction_id,
        "amount": amount,
        "timestamp": timestamp,
        "user_id": "u-1",
    })
    .to_string()
    .into_bytes()
}

fn delivery(offset: u64, payload: Vec<u8>) -> Delivery {
    Delivery {
        partition_id: "p0".to_string(),
        offset,
        payload,
    }
}

async fn publish_and_load(h: &Harness, version: &str) {
    publish_model(h.store.as_ref(), &metadata(version, 2), FRAUD_WEIGHTS, true)
        .await
        .unwrap();
    h.pipeline.bootstrap_model().await;
    assert_eq!(h.pipeline.registry.active_version().as_deref(), Some(version));
}

fn prediction_store(h: &Harness) -> PredictionStore {
    PredictionStore::new(IdempotentWriter::new(
        h.store.clone(),
        RetryPolicy::immediate(1),
        Duration::from_secs(1),
    ))
}

#[tokio::test]
async fn test_high_value_event_is_stored_scored_and_alerted() {
    let h = harness();
    publish_and_load(&h, "v1").await;

    let raw = payload("T1", 1500.0, "2024-03-01T10:00:00Z");
    let outcome = h.pipeline.coordinator.process(&delivery(0, raw)).await;

    let prediction = match outcome {
        EventOutcome::Scored { ack, prediction } => {
            assert_eq!(ack, WriteAck::Created);
            prediction
        }
        other => panic!("expected a scored event, got {:?}", other),
    };
    assert_eq!(prediction.transaction_id, "T1");
    assert_eq!(prediction.model_version, "v1");
    assert!(prediction.is_fraud);

    let stored = prediction_store(&h).get("T1").await.unwrap().unwrap();
    assert_eq!(stored.fraud_score, prediction.fraud_score);

    let event = Event::new("T1", 1500.0, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    let features = FeatureExtractor::default().derive(&event, 2).unwrap();
    assert_eq!(features.get("high_transaction"), Some(1.0));
    assert_eq!(features.get("transaction_hour"), Some(10.0));

    let fraud_alerts = h.alerts.fraud_alerts();
    assert_eq!(fraud_alerts.len(), 1);
    assert_eq!(fraud_alerts[0].transaction_id, "T1");

    assert_eq!(h.pipeline.coordinator.checkpoints().committed("p0").await, Some(0));
    assert_eq!(h.bus.acked("p0"), Some(0));
}

#[tokio::test]
async fn test_redelivered_event_is_stored_once() {
    let h = harness();
    publish_and_load(&h, "v1").await;

    let raw = payload("T2", 40.0, "2024-03-01T12:00:00Z");
    let first = h.pipeline.coordinator.process(&delivery(5, raw.clone())).await;
    let second = h.pipeline.coordinator.process(&delivery(7, raw)).await;

    assert!(matches!(first, EventOutcome::Scored { ack: WriteAck::Created, .. }));
    assert!(matches!(second, EventOutcome::Scored { ack: WriteAck::Unchanged, .. }));

    let events = h.store.list(EVENTS_PREFIX).await.unwrap();
    assert_eq!(events, vec!["events/T2".to_string()]);
    assert_eq!(h.pipeline.coordinator.checkpoints().committed("p0").await, Some(7));
    assert_eq!(h.pipeline.metrics.duplicates.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_redelivered_fraud_event_alerts_once() {
    let h = harness();
    publish_and_load(&h, "v1").await;

    let raw = payload("T1", 1500.0, "2024-03-01T10:00:00Z");
    let first = h.pipeline.coordinator.process(&delivery(5, raw.clone())).await;
    let stored = prediction_store(&h).get("T1").await.unwrap().unwrap();
    let second = h.pipeline.coordinator.process(&delivery(7, raw)).await;

    let EventOutcome::Scored { prediction: first, .. } = first else {
        panic!("expected a scored event");
    };
    let EventOutcome::Scored { ack, prediction: second } = second else {
        panic!("expected a scored event");
    };
    assert_eq!(ack, WriteAck::Unchanged);
    assert_eq!(second, first);

    assert_eq!(h.alerts.fraud_alerts().len(), 1);
    assert_eq!(prediction_store(&h).get("T1").await.unwrap().unwrap(), stored);
    assert_eq!(h.pipeline.coordinator.checkpoints().committed("p0").await, Some(7));
}

#[tokio::test]
async fn test_malformed_event_is_rejected_and_checkpointed() {
    let h = harness();
    publish_and_load(&h, "v1").await;

    let raw = json!({"transaction_id": "T3", "timestamp": "2024-03-01T10:00:00Z"})
        .to_string()
        .into_bytes();
    let outcome = h.pipeline.coordinator.process(&delivery(3, raw)).await;

    assert!(matches!(outcome, EventOutcome::Rejected { .. }));
    assert!(h.store.list(EVENTS_PREFIX).await.unwrap().is_empty());
    assert!(prediction_store(&h).get("T3").await.unwrap().is_none());
    assert_eq!(h.pipeline.coordinator.checkpoints().committed("p0").await, Some(3));
}

#[tokio::test]
async fn test_incompatible_model_keeps_previous_version() {
    let h = harness();
    publish_and_load(&h, "v1").await;

    publish_model(h.store.as_ref(), &metadata("v2", 1), FRAUD_WEIGHTS, true)
        .await
        .unwrap();
    let watcher = h.pipeline.model_watcher();
    assert!(matches!(
        watcher.check_once().await,
        Err(LoadError::SchemaMismatch { expected: 1, actual: 2, .. })
    ));
    assert_eq!(h.pipeline.registry.active_version().as_deref(), Some("v1"));

    let raw = payload("T4", 2000.0, "2024-03-01T10:00:00Z");
    match h.pipeline.coordinator.process(&delivery(0, raw)).await {
        EventOutcome::Scored { prediction, .. } => assert_eq!(prediction.model_version, "v1"),
        other => panic!("expected a scored event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_store_outage_blocks_checkpoint_and_alerts_operator() {
    let h = harness();
    publish_and_load(&h, "v1").await;

    // Every attempt of the event write fails
    h.store.fail_next_operations(3);
    let raw = payload("T5", 10.0, "2024-03-01T10:00:00Z");
    let outcome = h.pipeline.coordinator.process(&delivery(9, raw)).await;

    match outcome {
        EventOutcome::StoreFailed { transaction_id, error } => {
            assert_eq!(transaction_id, "T5");
            assert!(matches!(error, StoreError::RetryExhausted { attempts: 3, .. }));
        }
        other => panic!("expected a store failure, got {:?}", other),
    }

    assert_eq!(h.pipeline.coordinator.checkpoints().committed("p0").await, None);
    assert_eq!(h.bus.acked("p0"), None);

    let operator_alerts = h.alerts.operator_alerts();
    assert_eq!(operator_alerts.len(), 1);
    assert_eq!(operator_alerts[0].kind, AlertKind::EventStoreExhausted);
    assert_eq!(operator_alerts[0].offset, 9);
    assert_eq!(operator_alerts[0].transaction_id.as_deref(), Some("T5"));
}

#[tokio::test]
async fn test_unscored_events_are_scored_after_reload() {
    let h = harness();

    let raw = payload("T6", 5000.0, "2024-03-01T02:00:00Z");
    let outcome = h.pipeline.coordinator.process(&delivery(0, raw)).await;
    assert!(matches!(outcome, EventOutcome::Unscored { .. }));
    assert_eq!(h.pipeline.coordinator.checkpoints().committed("p0").await, Some(0));

    let summary = h.pipeline.reprocessor.run_once().await.unwrap();
    assert_eq!(summary.scored, 0);
    assert_eq!(summary.still_unscored, 1);

    publish_model(h.store.as_ref(), &metadata("v1", 2), FRAUD_WEIGHTS, true)
        .await
        .unwrap();
    let outcome = h.pipeline.model_watcher().check_once().await.unwrap().unwrap();
    assert_eq!(outcome.version, "v1");

    let prediction = prediction_store(&h).get("T6").await.unwrap().unwrap();
    assert_eq!(prediction.model_version, "v1");

    let summary = h.pipeline.reprocessor.run_once().await.unwrap();
    assert_eq!(summary.scored, 0);
    assert_eq!(summary.still_unscored, 0);
}

#[tokio::test]
async fn test_event_unscored_under_incompatible_model_scored_after_compatible_reload() {
    let h = harness();
    let watcher = h.pipeline.model_watcher();

    // Only a model trained on the older feature schema is published
    publish_model(h.store.as_ref(), &metadata("v1", 1), FRAUD_WEIGHTS, true)
        .await
        .unwrap();
    assert!(matches!(
        watcher.check_once().await,
        Err(LoadError::SchemaMismatch { expected: 1, actual: 2, .. })
    ));

    let raw = payload("T7", 2500.0, "2024-03-01T03:00:00Z");
    let outcome = h.pipeline.coordinator.process(&delivery(0, raw)).await;
    assert!(matches!(outcome, EventOutcome::Unscored { .. }));
    assert!(prediction_store(&h).get("T7").await.unwrap().is_none());

    publish_model(h.store.as_ref(), &metadata("v2", 2), FRAUD_WEIGHTS, true)
        .await
        .unwrap();
    let outcome = watcher.check_once().await.unwrap().unwrap();
    assert_eq!(outcome.previous_version, None);
    assert_eq!(outcome.version, "v2");

    let prediction = prediction_store(&h).get("T7").await.unwrap().unwrap();
    assert_eq!(prediction.model_version, "v2");
    assert!(prediction.is_fraud);
    assert_eq!(h.alerts.fraud_alerts().len(), 1);
    assert!(h.store.list("unscored/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restart_resumes_after_committed_offset() {
    let store = Arc::new(MemoryObjectStore::new());
    let bus = Arc::new(MemoryBus::new());
    for (i, id) in ["A1", "A2", "A3"].iter().enumerate() {
        bus.publish("p0", payload(id, 10.0 + i as f64, "2024-03-01T10:00:00Z"));
    }

    let first = harness_over(store.clone(), bus.clone());
    publish_and_load(&first, "v1").await;
    let (_tx, rx) = watch::channel(false);
    let summaries = first
        .pipeline
        .coordinator
        .clone()
        .run(&["p0".to_string()], rx)
        .await
        .unwrap();
    assert_eq!(summaries[0].processed, 3);
    assert_eq!(summaries[0].last_offset, Some(2));

    let offset = bus.publish("p0", payload("A4", 99.0, "2024-03-01T11:00:00Z"));
    assert_eq!(offset, 3);

    // Fresh components over the same store and bus
    let second = harness_over(store.clone(), bus.clone());
    second.pipeline.bootstrap_model().await;
    let (_tx, rx) = watch::channel(false);
    let summaries = second
        .pipeline
        .coordinator
        .clone()
        .run(&["p0".to_string()], rx)
        .await
        .unwrap();

    assert_eq!(summaries[0].resumed_after, Some(2));
    assert_eq!(summaries[0].processed, 1);
    assert_eq!(
        second.pipeline.coordinator.checkpoints().state("p0").await,
        Some(PartitionState::Committed(3))
    );
    assert_eq!(store.list(EVENTS_PREFIX).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_shutdown_stops_workers_before_next_message() {
    let h = harness();
    h.bus.publish("p0", payload("S1", 10.0, "2024-03-01T10:00:00Z"));
    h.bus.publish("p0", payload("S2", 20.0, "2024-03-01T10:00:00Z"));

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let summaries = h
        .pipeline
        .coordinator
        .clone()
        .run(&["p0".to_string()], rx)
        .await
        .unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].processed, 0);
    assert_eq!(h.pipeline.coordinator.checkpoints().committed("p0").await, None);
    assert!(h.store.list(EVENTS_PREFIX).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_partitions_checkpoint_independently() {
    let h = harness();
    publish_and_load(&h, "v1").await;
    h.bus.publish("p0", payload("P0-1", 10.0, "2024-03-01T10:00:00Z"));
    h.bus.publish("p0", payload("P0-2", 10.0, "2024-03-01T10:00:00Z"));
    h.bus.publish("p1", payload("P1-1", 10.0, "2024-03-01T10:00:00Z"));

    let (_tx, rx) = watch::channel(false);
    let partitions = vec!["p0".to_string(), "p1".to_string()];
    let summaries = h.pipeline.coordinator.clone().run(&partitions, rx).await.unwrap();

    assert_eq!(summaries.len(), 2);
    assert_eq!(h.pipeline.coordinator.checkpoints().committed("p0").await, Some(1));
    assert_eq!(h.pipeline.coordinator.checkpoints().committed("p1").await, Some(0));
    assert_eq!(h.bus.acked("p1"), Some(0));
}
