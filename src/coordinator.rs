//! Ingestion coordinator
//!
//! Drives each partition through decode → store → derive/score → checkpoint.
//! Failures are isolated to the message that caused them. The checkpoint
//! advances once the raw event is durable (or the message was rejected as
//! malformed), whatever happened during scoring.

use crate::alerting::AlertSink;
use crate::bus::{Delivery, EventBus};
use crate::checkpoint::{AdvanceOutcome, CheckpointManager};
use crate::codec;
use crate::error::{StoreError, WorkerError};
use crate::event_store::{EventStore, WriteAck};
use crate::metrics::PipelineMetrics;
use crate::stage::{ScoreOutcome, ScoreStage};
use crate::types::alert::{AlertKind, OperatorAlert};
use crate::types::prediction::PredictionResult;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What happened to one delivered message
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Malformed payload, neither stored nor scored
    Rejected { reason: String },
    /// Stored and scored, possibly by an earlier delivery of the same event
    Scored {
        ack: WriteAck,
        prediction: PredictionResult,
    },
    /// Stored but flagged for reprocessing
    Unscored {
        transaction_id: String,
        ack: WriteAck,
        reason: String,
    },
    /// Could not be stored; offset not checkpointed, operator alerted
    StoreFailed {
        transaction_id: String,
        error: StoreError,
    },
}

impl EventOutcome {
    /// Whether the message's offset may be checkpointed
    pub fn advances_checkpoint(&self) -> bool {
        !matches!(self, EventOutcome::StoreFailed { .. })
    }
}

/// Counts from one partition worker run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSummary {
    pub partition_id: String,
    pub processed: u64,
    /// Offset the worker resumed after
    pub resumed_after: Option<u64>,
    pub last_offset: Option<u64>,
}

pub struct IngestionCoordinator {
    bus: Arc<dyn EventBus>,
    events: EventStore,
    stage: Arc<ScoreStage>,
    checkpoints: Arc<CheckpointManager>,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<PipelineMetrics>,
    milestone_every: u64,
}

impl IngestionCoordinator {
    pub fn new(
        bus: Arc<dyn EventBus>,
        events: EventStore,
        stage: Arc<ScoreStage>,
        checkpoints: Arc<CheckpointManager>,
        alerts: Arc<dyn AlertSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            bus,
            events,
            stage,
            checkpoints,
            alerts,
            metrics,
            milestone_every: 100,
        }
    }

    /// Log a progress line every `every` messages per partition
    pub fn with_milestone_every(mut self, every: u64) -> Self {
        self.milestone_every = every.max(1);
        self
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    /// Run one message through the pipeline, including its checkpoint.
    pub async fn process(&self, delivery: &Delivery) -> EventOutcome {
        let start = Instant::now();
        self.metrics.record_received();

        let outcome = match codec::decode(&delivery.payload) {
            Err(e) => {
                warn!(
                    partition = %delivery.partition_id,
                    offset = delivery.offset,
                    reason = %e,
                    "Rejected malformed event"
                );
                self.metrics.record_rejected();
                EventOutcome::Rejected { reason: e.reason() }
            }
            Ok(event) => match self.events.put(&event).await {
                Err(e) => {
                    self.metrics.record_store_failure();
                    self.report_store_failure(delivery, &event.transaction_id, &e)
                        .await;
                    EventOutcome::StoreFailed {
                        transaction_id: event.transaction_id,
                        error: e,
                    }
                }
                Ok(ack) => {
                    self.metrics.record_stored(ack);
                    let already_scored = match ack {
                        WriteAck::Unchanged => self.stage.existing_prediction(&event.transaction_id).await,
                        WriteAck::Created | WriteAck::Overwritten => None,
                    };
                    if let Some(prediction) = already_scored {
                        debug!(
                            transaction_id = %event.transaction_id,
                            offset = delivery.offset,
                            "Redelivered event already scored"
                        );
                        return self.finish(delivery, start, EventOutcome::Scored { ack, prediction }).await;
                    }
                    match self.stage.score(&event).await {
                        ScoreOutcome::Scored(prediction) => EventOutcome::Scored { ack, prediction },
                        ScoreOutcome::Unscored { reason } => EventOutcome::Unscored {
                            transaction_id: event.transaction_id,
                            ack,
                            reason,
                        },
                    }
                }
            },
        };

        self.finish(delivery, start, outcome).await
    }

    async fn finish(&self, delivery: &Delivery, start: Instant, outcome: EventOutcome) -> EventOutcome {
        if outcome.advances_checkpoint() {
            self.commit(delivery).await;
        }

        self.metrics.record_processing_time(start.elapsed());
        outcome
    }

    /// Consume one partition from its last committed offset until the stream
    /// ends or shutdown is signalled. Shutdown is only observed between messages.
    pub async fn run_partition(
        &self,
        partition_id: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<PartitionSummary, WorkerError> {
        let resumed_after = self
            .checkpoints
            .resume_position(partition_id)
            .await?
            .map(|position| position.offset);

        let mut deliveries = self.bus.subscribe(partition_id, resumed_after).await?;
        info!(partition = %partition_id, resume_after = ?resumed_after, "Partition worker started");

        let mut summary = PartitionSummary {
            partition_id: partition_id.to_string(),
            resumed_after,
            ..PartitionSummary::default()
        };

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = deliveries.next() => next,
            };

            let delivery = match next {
                None => break,
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    warn!(partition = %partition_id, error = %e, "Bus delivery failed");
                    continue;
                }
            };

            let outcome = self.process(&delivery).await;
            debug!(
                partition = %partition_id,
                offset = delivery.offset,
                outcome = ?outcome,
                "Message processed"
            );

            summary.processed += 1;
            summary.last_offset = Some(delivery.offset);

            if summary.processed % self.milestone_every == 0 {
                info!(
                    partition = %partition_id,
                    processed = summary.processed,
                    offset = delivery.offset,
                    throughput = format!("{:.1} ev/s", self.metrics.get_throughput()),
                    avg_latency_us = self.metrics.get_processing_stats().mean_us,
                    "Processing milestone"
                );
            }
        }

        let committed = self.checkpoints.committed(partition_id).await;
        info!(
            partition = %partition_id,
            processed = summary.processed,
            committed = ?committed,
            "Partition worker stopped"
        );
        Ok(summary)
    }

    /// Run one worker per partition in parallel and wait for all of them.
    pub async fn run(
        self: Arc<Self>,
        partitions: &[String],
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<PartitionSummary>, WorkerError> {
        let handles: Vec<_> = partitions
            .iter()
            .map(|partition_id| {
                let coordinator = self.clone();
                let partition_id = partition_id.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { coordinator.run_partition(&partition_id, shutdown).await })
            })
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        let mut first_error = None;

        for (partition_id, handle) in partitions.iter().zip(handles) {
            let result = handle.await.unwrap_or_else(|e| {
                Err(WorkerError::Panicked {
                    partition_id: partition_id.clone(),
                    reason: e.to_string(),
                })
            });
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!(partition = %partition_id, error = %e, "Partition worker failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summaries),
        }
    }

    async fn commit(&self, delivery: &Delivery) {
        match self
            .checkpoints
            .advance(&delivery.partition_id, delivery.offset)
            .await
        {
            Ok(AdvanceOutcome::Committed(_)) => self.metrics.record_checkpoint(true),
            Ok(AdvanceOutcome::Ignored { committed }) => debug!(
                partition = %delivery.partition_id,
                offset = delivery.offset,
                committed = committed,
                "Checkpoint already past offset"
            ),
            Err(e) => {
                self.metrics.record_checkpoint(false);
                error!(
                    partition = %delivery.partition_id,
                    offset = delivery.offset,
                    error = %e,
                    "Checkpoint commit failed"
                );
                let alert = OperatorAlert::new(
                    AlertKind::CheckpointFailed,
                    &delivery.partition_id,
                    delivery.offset,
                    e.to_string(),
                );
                self.publish_operator(alert).await;
            }
        }
    }

    async fn report_store_failure(&self, delivery: &Delivery, transaction_id: &str, err: &StoreError) {
        error!(
            partition = %delivery.partition_id,
            offset = delivery.offset,
            transaction_id = %transaction_id,
            error = %err,
            "Event could not be stored, offset needs manual replay"
        );
        let alert = OperatorAlert::new(
            AlertKind::EventStoreExhausted,
            &delivery.partition_id,
            delivery.offset,
            err.to_string(),
        )
        .with_transaction(transaction_id);
        self.publish_operator(alert).await;
    }

    async fn publish_operator(&self, alert: OperatorAlert) {
        if let Err(e) = self.alerts.publish_operator(&alert).await {
            error!(
                alert_id = %alert.alert_id,
                partition = %alert.partition_id,
                offset = alert.offset,
                error = %e,
                "Failed to publish operator alert"
            );
        }
    }
}
