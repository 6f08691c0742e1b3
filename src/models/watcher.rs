//! Periodic model rollout
//!
//! Training publishes a new version by moving the `models/current` pointer.
//! The watcher checks the pointer on an interval, reloads when it names a
//! version other than the active one, and then triggers reprocessing of
//! unscored events.

use super::registry::{ModelRegistry, ReloadOutcome, StoreModelSource};
use crate::error::LoadError;
use crate::reprocess::Reprocessor;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct ModelWatcher {
    registry: Arc<ModelRegistry>,
    source: StoreModelSource,
    interval: Duration,
    reprocessor: Option<Arc<Reprocessor>>,
    /// Last version rejected as incompatible; not retried until the pointer moves
    rejected: Mutex<Option<String>>,
}

impl ModelWatcher {
    pub fn new(registry: Arc<ModelRegistry>, source: StoreModelSource, interval: Duration) -> Self {
        Self {
            registry,
            source,
            interval,
            reprocessor: None,
            rejected: Mutex::new(None),
        }
    }

    /// Reprocess unscored events after every successful reload
    pub fn with_reprocessor(mut self, reprocessor: Arc<Reprocessor>) -> Self {
        self.reprocessor = Some(reprocessor);
        self
    }

    /// Check the pointer once. Returns the reload outcome when a new model
    /// was activated.
    pub async fn check_once(&self) -> Result<Option<ReloadOutcome>, LoadError> {
        let Some(version) = self.source.current_pointer().await? else {
            debug!("No model published yet");
            return Ok(None);
        };

        if self.registry.active_version().as_deref() == Some(version.as_str()) {
            return Ok(None);
        }
        if self.rejected.lock().as_deref() == Some(version.as_str()) {
            return Ok(None);
        }

        info!(model_version = %version, active_version = ?self.registry.active_version(), "New model published");

        match self.registry.reload(&self.source.at_version(&version)).await {
            Ok(outcome) => {
                *self.rejected.lock() = None;
                self.reprocess().await;
                Ok(Some(outcome))
            }
            Err(e) if e.is_transient() => {
                debug!(model_version = %version, error = %e, "Model fetch failed, retrying on next tick");
                Err(e)
            }
            Err(e) => {
                *self.rejected.lock() = Some(version);
                Err(e)
            }
        }
    }

    /// Check on every interval tick until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "Model watcher started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.check_once().await {
                        warn!(error = %e, "Model reload failed, keeping active model");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Model watcher stopped");
    }

    async fn reprocess(&self) {
        if let Some(reprocessor) = &self.reprocessor {
            if let Err(e) = reprocessor.run_once().await {
                error!(error = %e, "Reprocessing after reload failed");
            }
        }
    }
}
