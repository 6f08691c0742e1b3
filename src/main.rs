//! Fraud Ingestion Pipeline - Main Entry Point
//!
//! Consumes transaction events from NATS JetStream, stores them durably,
//! scores them with the active model and checkpoints each partition.

use anyhow::{Context, Result};
use fraud_ingestion_pipeline::{
    alerting::NatsAlertSink,
    bus::NatsBus,
    config::AppConfig,
    logging,
    metrics::MetricsReporter,
    storage::FsObjectStore,
    Pipeline,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    info!("Starting Fraud Ingestion Pipeline");
    info!(
        partitions = ?config.bus.partitions,
        schema_version = config.features.schema_version,
        high_value_threshold = config.features.high_value_threshold,
        detection_threshold = config.detection.threshold,
        store_root = %config.store.root,
        "Configuration loaded"
    );

    let store = Arc::new(
        FsObjectStore::open(&config.store.root)
            .await
            .with_context(|| format!("Failed to open object store at {}", config.store.root))?,
    );

    let bus = Arc::new(
        NatsBus::connect(&config.bus)
            .await
            .context("Failed to connect to NATS")?,
    );
    let alerts = Arc::new(NatsAlertSink::new(
        bus.client().clone(),
        &config.bus.fraud_alert_subject,
        &config.bus.operator_alert_subject,
    ));
    info!(
        fraud_alerts = %config.bus.fraud_alert_subject,
        operator_alerts = %config.bus.operator_alert_subject,
        "Publishing alerts"
    );

    let pipeline = Pipeline::build(&config, store, bus, alerts);
    pipeline.bootstrap_model().await;

    // Events left unscored by a previous run
    if let Err(e) = pipeline.reprocessor.run_once().await {
        warn!(error = %e, "Startup reprocessing failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reporter = MetricsReporter::new(pipeline.metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start(shutdown_rx.clone()));
    tokio::spawn(pipeline.model_watcher().run(shutdown_rx.clone()));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing in-flight events"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    let result = pipeline
        .coordinator
        .clone()
        .run(&config.bus.partitions, shutdown_rx)
        .await;

    info!("Pipeline shutting down...");
    pipeline.metrics.print_summary();

    result.context("Partition worker failed")?;
    Ok(())
}
