//! ONNX Runtime backed model
//!
//! Handles tensor outputs (XGBoost, random forest exports) and
//! `seq(map(int64, float))` outputs (CatBoost, LightGBM exports).

use super::runtime::ModelRuntime;
use crate::error::LoadError;
use crate::feature_extractor::FeatureVector;
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use parking_lot::Mutex;
use tracing::{debug, info};

pub struct OnnxModel {
    version: String,
    /// Session runs need exclusive access
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxModel {
    /// Build a session from serialized model bytes
    pub fn from_bytes(version: &str, bytes: &[u8], threads: usize) -> Result<Self, LoadError> {
        let runtime_error = |reason: String| LoadError::Runtime {
            version: version.to_string(),
            reason,
        };

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(threads.max(1)))
            .and_then(|b| b.commit_from_memory(bytes))
            .map_err(|e| runtime_error(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| runtime_error("model has no inputs".to_string()))?;

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob") || o.name.contains("output"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .ok_or_else(|| runtime_error("model has no outputs".to_string()))?;

        info!(
            model_version = %version,
            input = %input_name,
            output = %output_name,
            "ONNX model loaded"
        );

        Ok(Self {
            version: version.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    fn extract_probability(&self, outputs: &SessionOutputs) -> Result<f64, String> {
        if let Some(output) = outputs.get(self.output_name.as_str()) {
            if let Some(prob) = Self::probability_from(output) {
                return Ok(prob);
            }
        }

        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Some(prob) = Self::probability_from(&output) {
                debug!(model_version = %self.version, output = %name, "Extracted from fallback output");
                return Ok(prob);
            }
        }

        Err("no probability output found".to_string())
    }

    fn probability_from(output: &DynValue) -> Option<f64> {
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            let classes = dims.last().copied().unwrap_or(0);
            return match classes {
                n if n >= 2 => data.get(1).map(|&v| v as f64),
                _ => data.first().map(|&v| v as f64),
            };
        }

        if DynSequenceValueType::can_downcast(&output.dtype()) {
            return Self::probability_from_sequence_map(output);
        }

        None
    }

    fn probability_from_sequence_map(output: &DynValue) -> Option<f64> {
        let allocator = Allocator::default();
        let sequence = output.downcast_ref::<DynSequenceValueType>().ok()?;
        let maps = sequence
            .try_extract_sequence::<DynMapValueType>(&allocator)
            .ok()?;
        let pairs = maps.first()?.try_extract_key_values::<i64, f32>().ok()?;

        pairs
            .iter()
            .find(|(class, _)| *class == 1)
            .map(|(_, prob)| *prob as f64)
            .or_else(|| {
                pairs
                    .iter()
                    .find(|(class, _)| *class == 0)
                    .map(|(_, prob)| 1.0 - *prob as f64)
            })
    }
}

impl ModelRuntime for OnnxModel {
    fn predict(&self, features: &FeatureVector) -> Result<f64, String> {
        let values: Vec<f32> = features.values().into_iter().map(|v| v as f32).collect();
        let shape = vec![1_i64, values.len() as i64];
        let input = Tensor::from_array((shape, values)).map_err(|e| e.to_string())?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| e.to_string())?;

        self.extract_probability(&outputs)
    }

    fn format(&self) -> &'static str {
        "onnx"
    }
}
