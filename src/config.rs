//! Configuration management for the ingestion pipeline
//!
//! Values come from `config/config.toml` (or the file named by
//! `FRAUD_PIPELINE_CONFIG`), then `FRAUD_PIPELINE__SECTION__KEY` environment
//! variables. Every field has a default, so an empty file is a valid config.

use crate::feature_extractor::{CURRENT_SCHEMA_VERSION, DEFAULT_HIGH_VALUE_THRESHOLD};
use crate::retry::RetryPolicy;
use crate::types::alert::RiskLevelThresholds;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const CONFIG_PATH_ENV: &str = "FRAUD_PIPELINE_CONFIG";
const ENV_PREFIX: &str = "FRAUD_PIPELINE";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub store: StoreConfig,
    pub models: ModelsConfig,
    pub features: FeaturesConfig,
    pub detection: DetectionConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS JetStream configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// NATS server URL
    pub url: String,
    /// JetStream stream holding every partition
    pub stream: String,
    /// Partition `p` is the subject `{subject_prefix}.{p}`
    pub subject_prefix: String,
    /// Durable consumer names are `{consumer_prefix}-{p}`
    pub consumer_prefix: String,
    /// Partitions this instance consumes
    pub partitions: Vec<String>,
    /// Subject for outgoing fraud alerts
    pub fraud_alert_subject: String,
    /// Subject for operator alerts
    pub operator_alert_subject: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "TRANSACTIONS".to_string(),
            subject_prefix: "transactions".to_string(),
            consumer_prefix: "fraud-ingestion".to_string(),
            partitions: vec!["0".to_string(), "1".to_string()],
            fraud_alert_subject: "fraud.alerts".to_string(),
            operator_alert_subject: "fraud.operator".to_string(),
        }
    }
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the filesystem store
    pub root: String,
    /// Bound on every store call and model fetch
    pub io_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl StoreConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: "data".to_string(),
            io_timeout_ms: 10_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Model rollout configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// How often `models/current` is checked for a new version
    pub poll_interval_secs: u64,
    /// Score events left unscored once a compatible model is activated
    pub reprocess_on_reload: bool,
    /// Intra-op threads per ONNX session (`onnx` feature only)
    pub onnx_threads: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            reprocess_on_reload: true,
            onnx_threads: 1,
        }
    }
}

/// Feature derivation configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Amounts strictly above this are high value
    pub high_value_threshold: f64,
    /// Feature schema the engine produces
    pub schema_version: u32,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            high_value_threshold: DEFAULT_HIGH_VALUE_THRESHOLD,
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Fraud score at or above which a prediction is labelled fraud and alerted
    pub threshold: f64,
    /// Risk level classification thresholds
    pub risk_levels: RiskLevelThresholds,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            risk_levels: RiskLevelThresholds::default(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
    /// Log a progress line every this many processed events
    pub milestone_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            metrics_interval_secs: 30,
            milestone_every: 100,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path. A missing file is not an error.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bus.partitions")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.bus.partitions.is_empty() {
            anyhow::bail!("bus.partitions must name at least one partition");
        }
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            anyhow::bail!("detection.threshold must be within [0, 1]");
        }
        if !self.features.high_value_threshold.is_finite() {
            anyhow::bail!("features.high_value_threshold must be finite");
        }
        crate::feature_extractor::feature_names(self.features.schema_version)
            .context("features.schema_version")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.bus.url, "nats://localhost:4222");
        assert_eq!(config.store.io_timeout(), Duration::from_secs(10));
        assert_eq!(config.store.retry.max_attempts, 3);
        assert_eq!(config.features.high_value_threshold, 1000.0);
        assert_eq!(config.features.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(config.models.onnx_threads, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[features]\nhigh_value_threshold = 250.0\n\n[models]\nonnx_threads = 4\n\n[store.retry]\nmax_attempts = 5\n\n[bus]\npartitions = [\"a\", \"b\", \"c\"]"
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();

        assert_eq!(config.features.high_value_threshold, 250.0);
        assert_eq!(config.features.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(config.store.retry.max_attempts, 5);
        assert_eq!(config.store.retry.base_delay_ms, 200);
        assert_eq!(config.bus.partitions, vec!["a", "b", "c"]);
        assert_eq!(config.bus.stream, "TRANSACTIONS");
        assert_eq!(config.models.onnx_threads, 4);
        assert!(config.models.reprocess_on_reload);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.detection.threshold, 0.5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.features.schema_version = 7;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.bus.partitions.clear();
        assert!(config.validate().is_err());
    }
}
