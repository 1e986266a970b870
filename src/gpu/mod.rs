//! Accelerated backend seam.
//!
//! The engine never touches device memory directly. A backend uploads host
//! data into a [`DeviceBuffer`], and every buffer knows how to read itself back
//! and how to duplicate itself on the device, so transfer and copy decisions in
//! `compute::transfer` stay backend agnostic.

pub mod emulated;
#[cfg(feature = "vulkan")]
pub mod gpu_memory;
#[cfg(feature = "vulkan")]
pub mod vk_gpu;

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::utils::error::EngineError;

pub use emulated::EmulatedBackend;

pub trait DeviceBuffer: Send + Sync + fmt::Debug {
    /// Number of f32 elements held on the device, padding included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the full device contents back to host memory.
    fn read(&self) -> Result<Vec<f32>, EngineError>;

    /// Device-side copy into a fresh, independently owned buffer.
    fn duplicate(&self) -> Result<Arc<dyn DeviceBuffer>, EngineError>;
}

/// Result of an upload: the device handle and the padded storage shape.
pub struct DeviceTensor {
    pub buffer: Arc<dyn DeviceBuffer>,
    pub actual_shape: Vec<usize>,
}

pub trait AcceleratedBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn upload(&self, data: &[f32], shape: &[usize]) -> Result<DeviceTensor, EngineError>;

    fn memory_in_use(&self) -> u64;

    /// Bytes that can still be allocated before the budget is exhausted.
    fn memory_available(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Emulated,
    Vulkan,
}

pub fn create_backend(
    kind: BackendKind,
    memory_limit: Option<u64>,
) -> Result<Arc<dyn AcceleratedBackend>, EngineError> {
    match kind {
        BackendKind::Emulated => Ok(Arc::new(EmulatedBackend::new(
            memory_limit.unwrap_or(emulated::DEFAULT_MEMORY_LIMIT),
        ))),
        #[cfg(feature = "vulkan")]
        BackendKind::Vulkan => Ok(Arc::new(vk_gpu::VulkanBackend::new(0)?)),
        #[cfg(not(feature = "vulkan"))]
        BackendKind::Vulkan => Err(EngineError::Configuration(
            "the vulkan backend requires building with the `vulkan` feature".into(),
        )),
    }
}
