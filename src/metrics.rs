//! Pipeline counters and statistics

use crate::event_store::WriteAck;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Messages read from the bus
    pub events_received: AtomicU64,
    /// Messages rejected by the codec
    pub events_rejected: AtomicU64,
    /// Events written for the first time
    pub events_stored: AtomicU64,
    /// Redeliveries with identical content
    pub duplicates: AtomicU64,
    /// Redeliveries that replaced stored content
    pub overwrites: AtomicU64,
    /// Events that could not be stored after all retries
    pub store_failures: AtomicU64,
    pub events_scored: AtomicU64,
    pub events_unscored: AtomicU64,
    /// Events scored later by the reprocessor
    pub events_reprocessed: AtomicU64,
    pub checkpoint_commits: AtomicU64,
    pub checkpoint_failures: AtomicU64,
    pub alerts_generated: AtomicU64,
    alerts_by_level: RwLock<HashMap<String, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Risk score distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            events_stored: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            overwrites: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            events_scored: AtomicU64::new(0),
            events_unscored: AtomicU64::new(0),
            events_reprocessed: AtomicU64::new(0),
            checkpoint_commits: AtomicU64::new(0),
            checkpoint_failures: AtomicU64::new(0),
            alerts_generated: AtomicU64::new(0),
            alerts_by_level: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self, ack: WriteAck) {
        let counter = match ack {
            WriteAck::Created => &self.events_stored,
            WriteAck::Unchanged => &self.duplicates,
            WriteAck::Overwritten => &self.overwrites,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful scoring
    pub fn record_scored(&self, fraud_score: f64) {
        self.events_scored.fetch_add(1, Ordering::Relaxed);

        let bucket = (fraud_score * 10.0).clamp(0.0, 9.0) as usize;
        self.score_buckets.write()[bucket] += 1;
    }

    pub fn record_unscored(&self) {
        self.events_unscored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reprocessed(&self) {
        self.events_reprocessed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self, committed: bool) {
        let counter = if committed {
            &self.checkpoint_commits
        } else {
            &self.checkpoint_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self, risk_level: &str) {
        self.alerts_generated.fetch_add(1, Ordering::Relaxed);
        *self
            .alerts_by_level
            .write()
            .entry(risk_level.to_string())
            .or_insert(0) += 1;
    }

    /// Record end-to-end processing time of one message
    pub fn record_processing_time(&self, processing_time: Duration) {
        let mut times = self.processing_times.write();
        times.push(processing_time.as_micros() as u64);
        // Keep only last 10000 for memory efficiency
        if times.len() > 10000 {
            times.drain(0..5000);
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted = self.processing_times.read().clone();
        if sorted.is_empty() {
            return ProcessingStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Messages per second since start
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.events_received.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        *self.score_buckets.read()
    }

    pub fn get_alerts_by_level(&self) -> HashMap<String, u64> {
        self.alerts_by_level.read().clone()
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let processing = self.get_processing_stats();

        info!(
            received = load(&self.events_received),
            rejected = load(&self.events_rejected),
            stored = load(&self.events_stored),
            duplicates = load(&self.duplicates),
            overwrites = load(&self.overwrites),
            store_failures = load(&self.store_failures),
            scored = load(&self.events_scored),
            unscored = load(&self.events_unscored),
            reprocessed = load(&self.events_reprocessed),
            checkpoint_commits = load(&self.checkpoint_commits),
            checkpoint_failures = load(&self.checkpoint_failures),
            alerts = load(&self.alerts_generated),
            throughput = format!("{:.1} ev/s", self.get_throughput()),
            "Pipeline counters"
        );
        info!(
            count = processing.count,
            mean_us = processing.mean_us,
            p50_us = processing.p50_us,
            p95_us = processing.p95_us,
            p99_us = processing.p99_us,
            max_us = processing.max_us,
            "Processing time"
        );

        let distribution = self.get_score_distribution();
        if distribution.iter().any(|&count| count > 0) {
            info!(buckets = ?distribution, "Fraud score distribution (0.1 wide buckets)");
        }
        let by_level = self.get_alerts_by_level();
        if !by_level.is_empty() {
            info!(by_level = ?by_level, "Alerts by risk level");
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Logs a metrics summary on an interval until shutdown
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // First tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.metrics.print_summary(),
                _ = shutdown.changed() => break,
            }
        }
    }
}
