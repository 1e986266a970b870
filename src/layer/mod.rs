pub mod activations;
pub mod batch_norm;
pub mod concat;
pub mod dense;
pub mod dropout;
pub mod element_wise;
pub mod execution;
pub mod factory;
pub mod layer;
pub mod recurrent;
pub mod reshape;
pub mod wrappers;

pub use execution::ComputeContext;
pub use factory::Layers;
pub use layer::Layer;
