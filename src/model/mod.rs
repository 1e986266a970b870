pub mod config;
pub mod description;
pub mod graph;
#[allow(clippy::module_inception)]
pub mod model;
pub mod params;
pub mod weights;

pub use config::{ExecutionOptions, ModelConfig, ModelFilepaths};
pub use description::{DescriptionForm, ModelDescription};
pub use graph::{GraphBuilder, InputTensor, LayerNode, ModelGraph, NodeKind};
pub use model::{Model, ModelArtifacts};
pub use weights::{WeightBinder, WeightMetadataEntry};
