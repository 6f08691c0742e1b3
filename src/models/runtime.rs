//! Model runtimes that turn a feature vector into a fraud probability

use crate::error::LoadError;
use crate::feature_extractor::{feature_names, FeatureVector};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Compiled, immutable scoring function of one model version
pub trait ModelRuntime: Send + Sync {
    /// Fraud probability for `features`. Errors are reported as text and
    /// wrapped by the scoring engine.
    fn predict(&self, features: &FeatureVector) -> Result<f64, String>;

    /// Artifact format this runtime interprets
    fn format(&self) -> &'static str;
}

/// Logistic regression over named features.
///
/// Weights are JSON: `{"bias": -4.0, "coefficients": {"high_transaction": 2.5}}`.
/// Features without a coefficient contribute nothing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogisticModel {
    pub bias: f64,
    pub coefficients: BTreeMap<String, f64>,
}

impl LogisticModel {
    /// Parse weights and check every coefficient names a feature of `schema_version`.
    pub fn from_bytes(version: &str, bytes: &[u8], schema_version: u32) -> Result<Self, LoadError> {
        let runtime_error = |reason: String| LoadError::Runtime {
            version: version.to_string(),
            reason,
        };

        let model: LogisticModel =
            serde_json::from_slice(bytes).map_err(|e| runtime_error(e.to_string()))?;

        let names = feature_names(schema_version).map_err(|e| runtime_error(e.to_string()))?;
        if let Some(unknown) = model
            .coefficients
            .keys()
            .find(|name| !names.contains(&name.as_str()))
        {
            return Err(runtime_error(format!(
                "coefficient `{}` is not a feature of schema v{}",
                unknown, schema_version
            )));
        }

        if !model.bias.is_finite() || model.coefficients.values().any(|w| !w.is_finite()) {
            return Err(runtime_error("weights must be finite".to_string()));
        }

        Ok(model)
    }

    /// Linear term before the sigmoid
    pub fn logit(&self, features: &FeatureVector) -> f64 {
        features
            .features
            .iter()
            .filter_map(|(name, value)| self.coefficients.get(*name).map(|w| w * value))
            .fold(self.bias, |acc, term| acc + term)
    }
}

impl ModelRuntime for LogisticModel {
    fn predict(&self, features: &FeatureVector) -> Result<f64, String> {
        let z = self.logit(features);
        if !z.is_finite() {
            return Err(format!("non-finite logit {}", z));
        }
        Ok(1.0 / (1.0 + (-z).exp()))
    }

    fn format(&self) -> &'static str {
        "logistic"
    }
}
