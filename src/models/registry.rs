//! Versioned model registry with hot swap
//!
//! The registry owns one active model behind an `RwLock<Option<Arc<Model>>>`.
//! Scorers clone the `Arc` under a short read lock, so a superseded model
//! stays alive until in-flight scorings drop it. A reload fetches and
//! compiles the new model outside the lock and only takes the write lock to
//! swap the pointer.

use super::runtime::{LogisticModel, ModelRuntime};
use crate::error::{LoadError, ObjectStoreError};
use crate::feature_extractor::FeatureVector;
use crate::storage::ObjectStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const MODELS_PREFIX: &str = "models/";
pub const CURRENT_POINTER_KEY: &str = "models/current";

/// Metadata published next to the weights at `models/{version}.meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: String,
    pub expected_feature_schema_version: u32,
    /// Runtime that interprets the weights (`logistic` or `onnx`)
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "logistic".to_string()
}

/// Fetched but not yet compiled model
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub metadata: ModelMetadata,
    pub weights: Vec<u8>,
}

/// An immutable, loaded scoring model
pub struct Model {
    pub version: String,
    pub expected_feature_schema_version: u32,
    pub serialized_weights: Vec<u8>,
    runtime: Box<dyn ModelRuntime>,
}

impl Model {
    /// Compile an artifact with the runtime its metadata names.
    ///
    /// `onnx_threads` sizes the intra-op pool of ONNX sessions.
    pub fn compile(artifact: ModelArtifact, onnx_threads: usize) -> Result<Self, LoadError> {
        let ModelArtifact { metadata, weights } = artifact;

        let runtime: Box<dyn ModelRuntime> = match metadata.format.as_str() {
            "logistic" => Box::new(LogisticModel::from_bytes(
                &metadata.version,
                &weights,
                metadata.expected_feature_schema_version,
            )?),
            #[cfg(feature = "onnx")]
            "onnx" => Box::new(super::onnx::OnnxModel::from_bytes(
                &metadata.version,
                &weights,
                onnx_threads,
            )?),
            other => return Err(LoadError::UnsupportedFormat(other.to_string())),
        };

        Ok(Self {
            version: metadata.version,
            expected_feature_schema_version: metadata.expected_feature_schema_version,
            serialized_weights: weights,
            runtime,
        })
    }

    /// Build a model around an existing runtime
    pub fn with_runtime(
        version: impl Into<String>,
        expected_feature_schema_version: u32,
        runtime: Box<dyn ModelRuntime>,
    ) -> Self {
        Self {
            version: version.into(),
            expected_feature_schema_version,
            serialized_weights: Vec::new(),
            runtime,
        }
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<f64, String> {
        self.runtime.predict(features)
    }

    pub fn format(&self) -> &'static str {
        self.runtime.format()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("version", &self.version)
            .field("expected_feature_schema_version", &self.expected_feature_schema_version)
            .field("format", &self.format())
            .field("weights_len", &self.serialized_weights.len())
            .finish()
    }
}

/// Where model artifacts come from
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Fetch the artifact to load
    async fn fetch(&self) -> Result<ModelArtifact, LoadError>;
}

/// Reads artifacts from the object store.
///
/// Layout: weights at `models/{version}`, metadata at
/// `models/{version}.meta.json`, the version to serve at `models/current`.
#[derive(Clone)]
pub struct StoreModelSource {
    store: Arc<dyn ObjectStore>,
    /// Fixed version; `None` follows `models/current`
    version: Option<String>,
    timeout: Duration,
}

impl StoreModelSource {
    /// Source following the `models/current` pointer
    pub fn latest(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self {
            store,
            version: None,
            timeout,
        }
    }

    /// Source for one fixed version
    pub fn pinned(store: Arc<dyn ObjectStore>, version: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            version: Some(version.into()),
            timeout,
        }
    }

    /// Same store, fixed to `version`
    pub fn at_version(&self, version: impl Into<String>) -> Self {
        Self::pinned(self.store.clone(), version, self.timeout)
    }

    pub fn weights_key(version: &str) -> String {
        format!("{}{}", MODELS_PREFIX, version)
    }

    pub fn metadata_key(version: &str) -> String {
        format!("{}{}.meta.json", MODELS_PREFIX, version)
    }

    /// Version named by `models/current`, `None` when nothing is published
    pub async fn current_pointer(&self) -> Result<Option<String>, LoadError> {
        match self.get(CURRENT_POINTER_KEY).await {
            Ok(bytes) => {
                let version = String::from_utf8(bytes)
                    .map_err(|e| LoadError::InvalidMetadata(e.to_string()))?
                    .trim()
                    .to_string();
                if version.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(version))
                }
            }
            Err(LoadError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, LoadError> {
        match tokio::time::timeout(self.timeout, self.store.get(key)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(ObjectStoreError::NotFound(_))) => Err(LoadError::NotFound(key.to_string())),
            Ok(Err(e)) => Err(LoadError::Fetch(e.to_string())),
            Err(_) => Err(LoadError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl ModelSource for StoreModelSource {
    async fn fetch(&self) -> Result<ModelArtifact, LoadError> {
        let version = match &self.version {
            Some(version) => version.clone(),
            None => self
                .current_pointer()
                .await?
                .ok_or_else(|| LoadError::NotFound(CURRENT_POINTER_KEY.to_string()))?,
        };

        let metadata: ModelMetadata = serde_json::from_slice(&self.get(&Self::metadata_key(&version)).await?)
            .map_err(|e| LoadError::InvalidMetadata(e.to_string()))?;

        if metadata.version != version {
            return Err(LoadError::InvalidMetadata(format!(
                "metadata names version {} but was published as {}",
                metadata.version, version
            )));
        }

        let weights = self.get(&Self::weights_key(&version)).await?;
        Ok(ModelArtifact { metadata, weights })
    }
}

/// Publish a model artifact; with `make_current` also move the pointer to it.
///
/// This is the training side of the layout, used by tooling and tests.
pub async fn publish_model(
    store: &dyn ObjectStore,
    metadata: &ModelMetadata,
    weights: &[u8],
    make_current: bool,
) -> Result<(), ObjectStoreError> {
    let meta_bytes =
        serde_json::to_vec(metadata).map_err(|e| ObjectStoreError::Io(e.to_string()))?;

    store
        .put(&StoreModelSource::weights_key(&metadata.version), weights.to_vec(), true)
        .await?;
    store
        .put(&StoreModelSource::metadata_key(&metadata.version), meta_bytes, true)
        .await?;
    if make_current {
        store
            .put(CURRENT_POINTER_KEY, metadata.version.as_bytes().to_vec(), true)
            .await?;
    }
    Ok(())
}

/// Result of a successful reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub previous_version: Option<String>,
    pub version: String,
}

impl ReloadOutcome {
    pub fn swapped(&self) -> bool {
        self.previous_version.as_deref() != Some(self.version.as_str())
    }
}

pub struct ModelRegistry {
    active: RwLock<Option<Arc<Model>>>,
    /// Feature schema the engine produces
    schema_version: u32,
    onnx_threads: usize,
}

impl ModelRegistry {
    pub fn new(schema_version: u32) -> Self {
        Self {
            active: RwLock::new(None),
            schema_version,
            onnx_threads: 1,
        }
    }

    /// Intra-op threads for ONNX sessions compiled on reload
    pub fn with_onnx_threads(mut self, threads: usize) -> Self {
        self.onnx_threads = threads.max(1);
        self
    }

    pub fn onnx_threads(&self) -> usize {
        self.onnx_threads
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// The active model. Never blocks on a reload in progress.
    pub fn current(&self) -> Result<Arc<Model>, LoadError> {
        self.active.read().clone().ok_or(LoadError::NoActiveModel)
    }

    pub fn active_version(&self) -> Option<String> {
        self.active.read().as_ref().map(|m| m.version.clone())
    }

    /// Fetch, validate and activate a model from `source`.
    ///
    /// On any error the previously active model stays in place.
    pub async fn reload(&self, source: &dyn ModelSource) -> Result<ReloadOutcome, LoadError> {
        let artifact = source.fetch().await.map_err(|e| {
            warn!(error = %e, "Model fetch failed, keeping active model");
            e
        })?;

        let expected = artifact.metadata.expected_feature_schema_version;
        if expected != self.schema_version {
            let err = LoadError::SchemaMismatch {
                version: artifact.metadata.version.clone(),
                expected,
                actual: self.schema_version,
            };
            warn!(
                model_version = %artifact.metadata.version,
                expected_schema = expected,
                engine_schema = self.schema_version,
                active_version = ?self.active_version(),
                "Rejecting model with incompatible feature schema"
            );
            return Err(err);
        }

        let staged = Arc::new(Model::compile(artifact, self.onnx_threads).map_err(|e| {
            warn!(error = %e, "Model compilation failed, keeping active model");
            e
        })?);
        Ok(self.activate(staged))
    }

    /// Swap in an already compiled model
    pub fn install(&self, model: Model) -> Result<ReloadOutcome, LoadError> {
        if model.expected_feature_schema_version != self.schema_version {
            return Err(LoadError::SchemaMismatch {
                version: model.version,
                expected: model.expected_feature_schema_version,
                actual: self.schema_version,
            });
        }
        Ok(self.activate(Arc::new(model)))
    }

    fn activate(&self, model: Arc<Model>) -> ReloadOutcome {
        let version = model.version.clone();
        let format = model.format();
        let previous = self.active.write().replace(model);
        let previous_version = previous.map(|m| m.version.clone());

        info!(
            model_version = %version,
            previous_version = ?previous_version,
            format = %format,
            "Model activated"
        );

        ReloadOutcome {
            previous_version,
            version,
        }
    }
}
