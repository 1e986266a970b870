use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load {artifact} artifact: {reason}")]
    ArtifactLoad { artifact: String, reason: String },

    #[error("Artifact load cancelled: {0}")]
    Cancelled(String),

    #[error("Unknown layer class: {0}")]
    UnknownLayerClass(String),

    #[error("Weight '{weight}' for layer '{layer}' matched {matches} metadata entries, expected exactly 1")]
    MissingWeight {
        layer: String,
        weight: String,
        matches: usize,
    },

    #[error("Invalid weight data: {0}")]
    InvalidWeightData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Layer '{layer}' error: {reason}")]
    Layer { layer: String, reason: String },

    #[error("Accelerated backend error: {0}")]
    Backend(String),

    #[error("Model graph error: {0}")]
    Graph(String),

    #[error("A predict call is already running on this model")]
    AlreadyRunning,

    #[error("Model is not ready, call ready() first")]
    NotReady,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl EngineError {
    pub fn layer(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Layer {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    pub fn artifact_load(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ArtifactLoad {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "vulkan")]
impl From<vulkanalia::vk::ErrorCode> for EngineError {
    fn from(c: vulkanalia::vk::ErrorCode) -> Self {
        EngineError::Backend(format!("vk::ErrorCode: {:?}", c))
    }
}
