use std::sync::Arc;

use vulkanalia::{vk, vk::DeviceV1_0};

use crate::{gpu::DeviceBuffer, utils::error::EngineError};

use super::vk_gpu::VulkanContext;

/// Host-visible storage buffer. Freed, and returned to the backend's budget,
/// when the last handle drops.
pub struct GPUMemory {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    context: Arc<VulkanContext>,
}

impl GPUMemory {
    pub(super) fn new(
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
        context: Arc<VulkanContext>,
    ) -> Self {
        Self {
            buffer,
            memory,
            size,
            context,
        }
    }

    pub fn copy_into(&self, data: &[f32]) -> Result<(), EngineError> {
        let data_size = std::mem::size_of_val(data) as vk::DeviceSize;
        if data_size == 0 {
            return Ok(());
        }

        if data_size > self.size {
            return Err(EngineError::Backend(format!(
                "Data size {} exceeds GPU buffer size {}",
                data_size, self.size
            )));
        }

        unsafe {
            let data_ptr = self.context.device.map_memory(
                self.memory,
                0,
                data_size,
                vk::MemoryMapFlags::empty(),
            )? as *mut f32;

            std::ptr::copy_nonoverlapping(data.as_ptr(), data_ptr, data.len());

            self.context.device.unmap_memory(self.memory);
        }

        Ok(())
    }

    pub fn read_memory(&self) -> Result<Vec<f32>, EngineError> {
        let mut output_data = vec![0f32; self.size as usize / std::mem::size_of::<f32>()];
        if output_data.is_empty() {
            return Ok(output_data);
        }

        unsafe {
            let data_ptr = self.context.device.map_memory(
                self.memory,
                0,
                self.size,
                vk::MemoryMapFlags::empty(),
            )? as *const f32;

            std::ptr::copy_nonoverlapping(data_ptr, output_data.as_mut_ptr(), output_data.len());

            self.context.device.unmap_memory(self.memory);
        }

        Ok(output_data)
    }
}

impl std::fmt::Debug for GPUMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GPUMemory")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .finish()
    }
}

impl DeviceBuffer for GPUMemory {
    fn len(&self) -> usize {
        self.size as usize / std::mem::size_of::<f32>()
    }

    fn read(&self) -> Result<Vec<f32>, EngineError> {
        self.read_memory()
    }

    fn duplicate(&self) -> Result<Arc<dyn DeviceBuffer>, EngineError> {
        let copy = VulkanContext::allocate(&self.context, self.size)?;
        if self.size == 0 {
            return Ok(Arc::new(copy));
        }
        self.context.copy_buffer(self.buffer, copy.buffer, self.size)?;
        Ok(Arc::new(copy))
    }
}

impl Drop for GPUMemory {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_buffer(self.buffer, None);
            self.context.device.free_memory(self.memory, None);
        }
        self.context.memory_tracker.deallocate(self.size);
    }
}
