//! layerflow - run pretrained, declaratively described neural networks.
//!
//! A model is three artifacts: a Keras-style JSON architecture, a raw
//! little-endian f32 weight buffer and a JSON table locating each weight in
//! that buffer. [`Model`] loads them, builds a layer graph and runs forward
//! passes over it, computing every node exactly once in dependency order.
//! Layers that support it can keep their results on an accelerated backend.

pub mod compute;
pub mod gpu;
pub mod layer;
pub mod loader;
pub mod model;
pub mod scheduler;
pub mod tensor;
pub mod utils;

pub use gpu::{AcceleratedBackend, BackendKind, DeviceBuffer, EmulatedBackend};
pub use layer::{ComputeContext, Layer, Layers};
pub use loader::{ArtifactSource, FileSource};
pub use model::{
    DescriptionForm, ExecutionOptions, LayerNode, Model, ModelArtifacts, ModelConfig,
    ModelDescription, ModelFilepaths, ModelGraph, WeightMetadataEntry,
};
pub use tensor::{DeviceId, Tensor};
pub use utils::error::EngineError;
