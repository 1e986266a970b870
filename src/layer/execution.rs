use std::sync::Arc;

use crate::{gpu::AcceleratedBackend, tensor::Tensor, utils::error::EngineError};

/// What a layer may use while computing: the active accelerated backend, if
/// acceleration is enabled on the model.
#[derive(Clone, Debug, Default)]
pub struct ComputeContext {
    backend: Option<Arc<dyn AcceleratedBackend>>,
}

impl ComputeContext {
    pub fn host() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Option<Arc<dyn AcceleratedBackend>>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Option<&dyn AcceleratedBackend> {
        self.backend.as_deref()
    }

    /// Wrap freshly computed values, uploading them when the layer runs
    /// accelerated and a backend is available.
    pub fn emit(
        &self,
        accelerated: bool,
        shape: Vec<usize>,
        data: Vec<f32>,
    ) -> Result<Tensor, EngineError> {
        self.place(accelerated, Tensor::new(shape, data)?)
    }

    /// Move an existing tensor to where this layer's output should live.
    pub fn place(&self, accelerated: bool, tensor: Tensor) -> Result<Tensor, EngineError> {
        match (accelerated, self.backend()) {
            (true, Some(backend)) => tensor.to_accelerated(backend),
            _ => tensor.to_host(),
        }
    }
}
