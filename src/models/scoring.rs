//! Applies the active model to a feature vector

use super::registry::Model;
use crate::error::ScoreError;
use crate::feature_extractor::FeatureVector;
use crate::types::prediction::PredictionResult;
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    /// Scores at or above this are labelled fraud
    detection_threshold: f64,
}

impl ScoringEngine {
    pub fn new(detection_threshold: f64) -> Self {
        Self {
            detection_threshold,
        }
    }

    pub fn detection_threshold(&self) -> f64 {
        self.detection_threshold
    }

    /// Score `features` with `model`.
    ///
    /// The vector must have been derived with the schema the model expects.
    pub fn score(&self, features: &FeatureVector, model: &Model) -> Result<PredictionResult, ScoreError> {
        if features.feature_schema_version != model.expected_feature_schema_version {
            return Err(ScoreError::SchemaMismatch {
                model_version: model.version.clone(),
                expected: model.expected_feature_schema_version,
                features: features.feature_schema_version,
            });
        }

        let fraud_score = model.predict(features).map_err(|reason| ScoreError::Runtime {
            model_version: model.version.clone(),
            reason,
        })?;

        if !fraud_score.is_finite() || !(0.0..=1.0).contains(&fraud_score) {
            return Err(ScoreError::InvalidScore {
                model_version: model.version.clone(),
                score: fraud_score,
            });
        }

        Ok(PredictionResult {
            transaction_id: features.transaction_id.clone(),
            model_version: model.version.clone(),
            fraud_score,
            is_fraud: fraud_score >= self.detection_threshold,
            scored_at: Utc::now(),
        })
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::FeatureExtractor;
    use crate::models::runtime::{LogisticModel, ModelRuntime};
    use crate::types::event::Event;
    use chrono::TimeZone;

    struct FixedScore(f64);

    impl ModelRuntime for FixedScore {
        fn predict(&self, _features: &FeatureVector) -> Result<f64, String> {
            Ok(self.0)
        }

        fn format(&self) -> &'static str {
            "fixed"
        }
    }

    struct Broken;

    impl ModelRuntime for Broken {
        fn predict(&self, _features: &FeatureVector) -> Result<f64, String> {
            Err("session poisoned".to_string())
        }

        fn format(&self) -> &'static str {
            "broken"
        }
    }

    fn features(schema: u32) -> FeatureVector {
        let event = Event::new("T1", 1500.0, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        FeatureExtractor::default().derive(&event, schema).unwrap()
    }

    #[test]
    fn test_score_produces_prediction() {
        let weights = br#"{"bias": -1.0, "coefficients": {"high_transaction": 3.0}}"#;
        let model = Model::with_runtime(
            "v1",
            1,
            Box::new(LogisticModel::from_bytes("v1", weights, 1).unwrap()),
        );
        let engine = ScoringEngine::new(0.5);

        let prediction = engine.score(&features(1), &model).unwrap();

        assert_eq!(prediction.transaction_id, "T1");
        assert_eq!(prediction.model_version, "v1");
        assert!((prediction.fraud_score - 1.0 / (1.0 + (-2.0f64).exp())).abs() < 1e-12);
        assert!(prediction.is_fraud);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let model = Model::with_runtime("v1", 1, Box::new(FixedScore(0.7)));

        assert!(ScoringEngine::new(0.7).score(&features(1), &model).unwrap().is_fraud);
        assert!(!ScoringEngine::new(0.71).score(&features(1), &model).unwrap().is_fraud);
    }

    #[test]
    fn test_schema_mismatch() {
        let model = Model::with_runtime("v1", 1, Box::new(FixedScore(0.1)));

        assert_eq!(
            ScoringEngine::default().score(&features(2), &model),
            Err(ScoreError::SchemaMismatch {
                model_version: "v1".to_string(),
                expected: 1,
                features: 2,
            })
        );
    }

    #[test]
    fn test_runtime_and_range_failures() {
        let engine = ScoringEngine::default();

        let broken = Model::with_runtime("v1", 1, Box::new(Broken));
        assert!(matches!(
            engine.score(&features(1), &broken),
            Err(ScoreError::Runtime { .. })
        ));

        for bad in [1.5, -0.1, f64::NAN] {
            let model = Model::with_runtime("v1", 1, Box::new(FixedScore(bad)));
            assert!(matches!(
                engine.score(&features(1), &model),
                Err(ScoreError::InvalidScore { .. })
            ));
        }
    }
}
