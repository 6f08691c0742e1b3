//! Structured logging setup
//!
//! JSON output for production, pretty output for development. `RUST_LOG`
//! overrides the configured level when set.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CRATE_TARGET: &str = "fraud_ingestion_pipeline";

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => anyhow::bail!("unknown log format `{}` (expected json, pretty or compact)", other),
        }
    }
}

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(format!("warn,{}={}", CRATE_TARGET, level))
        .with_context(|| format!("invalid log level `{}`", level))
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> Result<()> {
    let format = LogFormat::parse(&config.format)?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(&config.level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false).with_target(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    }
    .context("Failed to install log subscriber")
}
