//! Model loading, hot swap and scoring

#[cfg(feature = "onnx")]
pub mod onnx;
pub mod registry;
pub mod runtime;
pub mod scoring;
pub mod watcher;

pub use registry::{
    publish_model, Model, ModelArtifact, ModelMetadata, ModelRegistry, ModelSource, ReloadOutcome,
    StoreModelSource,
};
pub use runtime::{LogisticModel, ModelRuntime};
pub use scoring::ScoringEngine;
pub use watcher::ModelWatcher;
