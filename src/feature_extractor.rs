//! Feature derivation for fraud scoring.
//!
//! Turns a validated [`Event`] into the ordered, versioned feature vector a
//! model was trained on. Derivation is pure: the same event and schema
//! version always give a bit-identical vector.

use crate::error::FeatureError;
use crate::types::event::Event;
use chrono::{Datelike, Timelike};
use serde::Serialize;
use std::collections::HashSet;
use tracing::error;

/// Schema produced by default
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Default amount above which a transaction counts as high value
pub const DEFAULT_HIGH_VALUE_THRESHOLD: f64 = 1000.0;

const SCHEMA_V1: &[&str] = &[
    "transaction_hour",
    "transaction_day",
    "transaction_month",
    "high_transaction",
];

const SCHEMA_V2: &[&str] = &[
    "transaction_hour",
    "transaction_day",
    "transaction_month",
    "high_transaction",
    "transaction_weekday",
    "is_weekend",
    "amount",
    "log_amount",
];

/// Ordered feature names of a schema version
pub fn feature_names(schema_version: u32) -> Result<&'static [&'static str], FeatureError> {
    match schema_version {
        1 => Ok(SCHEMA_V1),
        2 => Ok(SCHEMA_V2),
        other => Err(FeatureError::UnsupportedSchema(other)),
    }
}

/// Features of one transaction, in schema order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub transaction_id: String,
    pub features: Vec<(&'static str, f64)>,
    pub feature_schema_version: u32,
}

impl FeatureVector {
    /// Value of a named feature
    pub fn get(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|(feature, _)| *feature == name)
            .map(|(_, value)| *value)
    }

    /// Values in schema order
    pub fn values(&self) -> Vec<f64> {
        self.features.iter().map(|(_, value)| *value).collect()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Feature extractor that transforms events into model input features.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    high_value_threshold: f64,
}

impl FeatureExtractor {
    pub fn new(high_value_threshold: f64) -> Self {
        Self {
            high_value_threshold,
        }
    }

    pub fn high_value_threshold(&self) -> f64 {
        self.high_value_threshold
    }

    /// Derive the feature vector of `event` for `schema_version`.
    pub fn derive(&self, event: &Event, schema_version: u32) -> Result<FeatureVector, FeatureError> {
        let names = feature_names(schema_version)?;
        Self::check_source(event)?;

        let ts = event.timestamp;
        let high_transaction = if event.amount > self.high_value_threshold {
            1.0
        } else {
            0.0
        };

        let mut values = vec![
            ts.hour() as f64,
            ts.day() as f64,
            ts.month() as f64,
            high_transaction,
        ];

        if schema_version >= 2 {
            let weekday = ts.weekday().num_days_from_monday();
            values.push(weekday as f64);
            values.push(if weekday >= 5 { 1.0 } else { 0.0 });
            values.push(event.amount);
            values.push(event.amount.ln_1p());
        }

        debug_assert_eq!(names.len(), values.len());

        Ok(FeatureVector {
            transaction_id: event.transaction_id.clone(),
            features: names.iter().copied().zip(values).collect(),
            feature_schema_version: schema_version,
        })
    }

    /// Derive a batch, dropping repeated transaction ids (first one wins).
    ///
    /// Events that fail derivation are logged and skipped; only an unknown
    /// schema version fails the whole batch.
    pub fn derive_batch(
        &self,
        events: &[Event],
        schema_version: u32,
    ) -> Result<Vec<FeatureVector>, FeatureError> {
        feature_names(schema_version)?;

        let mut seen = HashSet::new();
        let mut vectors = Vec::with_capacity(events.len());

        for event in events {
            if !seen.insert(event.transaction_id.as_str()) {
                continue;
            }
            match self.derive(event, schema_version) {
                Ok(vector) => vectors.push(vector),
                Err(e) => {
                    error!(
                        transaction_id = %event.transaction_id,
                        error = %e,
                        "Skipping event with invalid source fields"
                    );
                }
            }
        }

        Ok(vectors)
    }

    /// Events built outside the codec can still carry values it would reject.
    fn check_source(event: &Event) -> Result<(), FeatureError> {
        if event.transaction_id.is_empty() {
            return Err(FeatureError::MissingField {
                transaction_id: String::new(),
                field: "transaction_id",
            });
        }
        if !event.amount.is_finite() || event.amount < 0.0 {
            return Err(FeatureError::InvalidField {
                transaction_id: event.transaction_id.clone(),
                field: "amount",
                reason: format!("{} is not a non-negative finite number", event.amount),
            });
        }
        Ok(())
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_VALUE_THRESHOLD)
    }
}
