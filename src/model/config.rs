use std::{collections::BTreeMap, path::Path};

use serde::Deserialize;

use crate::{gpu::BackendKind, utils::error::EngineError};

/// Locations of the three model artifacts.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ModelFilepaths {
    pub model: String,
    pub weights: String,
    pub metadata: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelConfig {
    pub filepaths: Option<ModelFilepaths>,
    /// Passed to the artifact source with every fetch.
    pub headers: BTreeMap<String, String>,
    pub accelerate: bool,
    pub pipeline_mode: bool,
    pub yield_between_layers: bool,
    pub backend: BackendKind,
    /// Byte budget for the emulated backend.
    pub device_memory_limit: Option<u64>,
}

impl ModelConfig {
    pub fn new(filepaths: ModelFilepaths) -> Self {
        Self {
            filepaths: Some(filepaths),
            ..Default::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn build(self) -> Result<Self, EngineError> {
        let Some(paths) = &self.filepaths else {
            return Err(EngineError::Configuration(
                "filepaths (model, weights, metadata) are required".into(),
            ));
        };
        for (label, path) in [
            ("model", &paths.model),
            ("weights", &paths.weights),
            ("metadata", &paths.metadata),
        ] {
            if path.trim().is_empty() {
                return Err(EngineError::Configuration(format!(
                    "filepaths.{} must not be empty",
                    label
                )));
            }
        }
        self.options().validate()?;
        Ok(self)
    }

    pub fn options(&self) -> ExecutionOptions {
        ExecutionOptions {
            accelerate: self.accelerate,
            pipeline_mode: self.pipeline_mode,
            yield_between_layers: self.yield_between_layers,
            backend: self.backend,
            device_memory_limit: self.device_memory_limit,
        }
    }
}

/// Runtime switches of a model, independent of where its artifacts came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub accelerate: bool,
    pub pipeline_mode: bool,
    pub yield_between_layers: bool,
    pub backend: BackendKind,
    pub device_memory_limit: Option<u64>,
}

impl ExecutionOptions {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.pipeline_mode && !self.accelerate {
            return Err(EngineError::Configuration(
                "pipelineMode requires accelerate".into(),
            ));
        }
        if self.device_memory_limit == Some(0) {
            return Err(EngineError::Configuration(
                "deviceMemoryLimit must be greater than zero".into(),
            ));
        }
        #[cfg(not(feature = "vulkan"))]
        if self.backend == BackendKind::Vulkan {
            return Err(EngineError::Configuration(
                "the vulkan backend requires building with the `vulkan` feature".into(),
            ));
        }
        Ok(())
    }
}
