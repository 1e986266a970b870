use std::{ffi::CString, ptr, sync::Arc, sync::Mutex};

use tracing::{debug, info};
use vulkanalia::{
    Device, Entry, Instance,
    loader::{LIBRARY, LibloadingLoader},
    vk::{self, DeviceV1_0, InstanceV1_0},
};

use crate::{
    compute::memory_tracker::MemoryTracker,
    gpu::{AcceleratedBackend, DeviceTensor},
    utils::error::EngineError,
};

use super::gpu_memory::GPUMemory;

/// Share of the device-local heap the backend lets itself use.
const MEMORY_BUDGET_FRACTION: f64 = 0.6;

/// Device state shared by the backend and every buffer it hands out, so
/// buffers can free themselves and issue copies after the backend is gone.
pub struct VulkanContext {
    _entry: Entry,
    instance: Instance,
    pub(super) device: Device,
    physical_device: vk::PhysicalDevice,
    queue: Mutex<vk::Queue>,
    command_pool: Mutex<vk::CommandPool>,
    pub(super) memory_tracker: MemoryTracker,
    device_name: String,
}

impl VulkanContext {
    fn new(device_index: usize) -> Result<Self, EngineError> {
        unsafe {
            let loader = LibloadingLoader::new(LIBRARY)
                .map_err(|e| EngineError::Backend(format!("failed to load Vulkan: {e}")))?;
            let entry = Entry::new(loader)
                .map_err(|e| EngineError::Backend(format!("failed to load Vulkan: {e}")))?;

            let aname = CString::new("layerflow")
                .map_err(|e| EngineError::Backend(e.to_string()))?;

            let appinfo = vk::ApplicationInfo {
                s_type: vk::StructureType::APPLICATION_INFO,
                next: ptr::null(),
                application_name: aname.as_ptr(),
                application_version: vk::make_version(1, 0, 0),
                engine_name: aname.as_ptr(),
                engine_version: vk::make_version(1, 0, 0),
                api_version: vk::make_version(1, 0, 0),
            };

            let create_info = vk::InstanceCreateInfo {
                s_type: vk::StructureType::INSTANCE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::InstanceCreateFlags::empty(),
                application_info: &appinfo,
                enabled_layer_count: 0,
                enabled_layer_names: ptr::null(),
                enabled_extension_count: 0,
                enabled_extension_names: ptr::null(),
            };

            let instance = entry.create_instance(&create_info, None)?;

            let physical_devices = instance.enumerate_physical_devices()?;
            let physical_device = *physical_devices.get(device_index).ok_or_else(|| {
                EngineError::Backend(format!(
                    "GPU index {} out of range ({} devices)",
                    device_index,
                    physical_devices.len()
                ))
            })?;

            let properties = instance.get_physical_device_properties(physical_device);
            let device_name = properties.device_name.to_string();

            let queue_family_index = instance
                .get_physical_device_queue_family_properties(physical_device)
                .iter()
                .enumerate()
                .find(|(_, properties)| properties.queue_flags.contains(vk::QueueFlags::COMPUTE))
                .map(|(index, _)| index as u32)
                .ok_or_else(|| EngineError::Backend("No compute queue family found".into()))?;

            let queue_priorities = [1.0f32];
            let queue_info = vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::DeviceQueueCreateFlags::empty(),
                queue_family_index,
                queue_count: 1,
                queue_priorities: queue_priorities.as_ptr(),
            };

            let device_features = vk::PhysicalDeviceFeatures::default();

            let device_create_info = vk::DeviceCreateInfo {
                s_type: vk::StructureType::DEVICE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::DeviceCreateFlags::empty(),
                queue_create_info_count: 1,
                queue_create_infos: &queue_info,
                enabled_layer_count: 0,
                enabled_layer_names: ptr::null(),
                enabled_extension_count: 0,
                enabled_extension_names: ptr::null(),
                enabled_features: &device_features,
            };

            let device = instance.create_device(physical_device, &device_create_info, None)?;
            let queue = device.get_device_queue(queue_family_index, 0);

            let command_pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                next: ptr::null(),
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                queue_family_index,
            };

            let command_pool = device.create_command_pool(&command_pool_info, None)?;

            let total_memory = Self::device_local_heap_size(&instance, physical_device);

            Ok(Self {
                _entry: entry,
                instance,
                device,
                physical_device,
                queue: Mutex::new(queue),
                command_pool: Mutex::new(command_pool),
                memory_tracker: MemoryTracker::new(
                    (total_memory as f64 * MEMORY_BUDGET_FRACTION) as u64,
                ),
                device_name,
            })
        }
    }

    fn device_local_heap_size(instance: &Instance, physical_device: vk::PhysicalDevice) -> u64 {
        unsafe {
            let memory_properties = instance.get_physical_device_memory_properties(physical_device);

            let device_local_heap_index = (0..memory_properties.memory_type_count)
                .find(|&i| {
                    memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
                })
                .map(|i| memory_properties.memory_types[i as usize].heap_index)
                .unwrap_or(0);

            memory_properties.memory_heaps[device_local_heap_index as usize].size
        }
    }

    fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32, EngineError> {
        let mem_properties = unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        };

        (0..mem_properties.memory_type_count)
            .find(|&i| {
                (type_filter & (1 << i)) != 0
                    && mem_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or_else(|| EngineError::Backend("Failed to find suitable memory type".into()))
    }

    /// Reserve budget and create a host-visible buffer of `size_in_bytes`.
    pub(super) fn allocate(
        context: &Arc<VulkanContext>,
        size_in_bytes: vk::DeviceSize,
    ) -> Result<GPUMemory, EngineError> {
        context.memory_tracker.allocate(size_in_bytes)?;

        let created = unsafe { context.create_buffer(size_in_bytes) };
        match created {
            Ok((buffer, memory)) => Ok(GPUMemory::new(
                buffer,
                memory,
                size_in_bytes,
                context.clone(),
            )),
            Err(e) => {
                context.memory_tracker.deallocate(size_in_bytes);
                Err(e)
            }
        }
    }

    unsafe fn create_buffer(
        &self,
        size_in_bytes: vk::DeviceSize,
    ) -> Result<(vk::Buffer, vk::DeviceMemory), EngineError> {
        let buffer_info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            next: ptr::null(),
            flags: vk::BufferCreateFlags::empty(),
            size: size_in_bytes.max(4),
            usage: vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_family_index_count: 0,
            queue_family_indices: ptr::null(),
        };

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let mem_requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let memory_type = match self.find_memory_type(
            mem_requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            next: ptr::null(),
            allocation_size: mem_requirements.size,
            memory_type_index: memory_type,
        };

        unsafe {
            let memory = match self.device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e.into());
                }
            };
            if let Err(e) = self.device.bind_buffer_memory(buffer, memory, 0) {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
                return Err(e.into());
            }
            Ok((buffer, memory))
        }
    }

    /// Record and submit a single buffer-to-buffer copy, then wait on it.
    pub(super) fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<(), EngineError> {
        let pool = self
            .command_pool
            .lock()
            .map_err(|_| EngineError::Backend("command pool lock poisoned".into()))?;

        unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                next: ptr::null(),
                command_pool: *pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
            };
            let command_buffer = self.device.allocate_command_buffers(&alloc_info)?[0];

            let begin_info = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                next: ptr::null(),
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                inheritance_info: ptr::null(),
            };
            self.device
                .begin_command_buffer(command_buffer, &begin_info)?;

            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            self.device
                .cmd_copy_buffer(command_buffer, src, dst, &[region]);
            self.device.end_command_buffer(command_buffer)?;

            let fence_info = vk::FenceCreateInfo {
                s_type: vk::StructureType::FENCE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::FenceCreateFlags::empty(),
            };
            let fence = self.device.create_fence(&fence_info, None)?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                next: ptr::null(),
                wait_semaphore_count: 0,
                wait_semaphores: ptr::null(),
                wait_dst_stage_mask: ptr::null(),
                command_buffer_count: 1,
                command_buffers: command_buffers.as_ptr(),
                signal_semaphore_count: 0,
                signal_semaphores: ptr::null(),
            };

            let submitted = {
                let queue = self
                    .queue
                    .lock()
                    .map_err(|_| EngineError::Backend("queue lock poisoned".into()))?;
                self.device.queue_submit(*queue, &[submit_info], fence)
            };

            let waited = submitted.and_then(|_| {
                self.device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map(|_| ())
            });

            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(*pool, &command_buffers);
            waited?;
        }

        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            if let Ok(pool) = self.command_pool.lock() {
                self.device.destroy_command_pool(*pool, None);
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Accelerated backend over a Vulkan device. Tensors are stored unpadded in
/// host-visible storage buffers; duplicates are device-side buffer copies.
pub struct VulkanBackend {
    context: Arc<VulkanContext>,
}

impl VulkanBackend {
    pub fn new(device_index: usize) -> Result<Self, EngineError> {
        let context = VulkanContext::new(device_index)?;
        info!(
            device = %context.device_name,
            budget_bytes = context.memory_tracker.get_maximum(),
            "initialised Vulkan backend"
        );
        Ok(Self {
            context: Arc::new(context),
        })
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("device", &self.context.device_name)
            .field("memory", &self.context.memory_tracker)
            .finish()
    }
}

impl AcceleratedBackend for VulkanBackend {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn upload(&self, data: &[f32], shape: &[usize]) -> Result<DeviceTensor, EngineError> {
        let logical: usize = shape.iter().product();
        if logical != data.len() {
            return Err(EngineError::Backend(format!(
                "upload of {} elements does not match shape {:?}",
                data.len(),
                shape
            )));
        }

        let size_in_bytes = std::mem::size_of_val(data) as vk::DeviceSize;
        let memory = VulkanContext::allocate(&self.context, size_in_bytes)?;
        memory.copy_into(data)?;
        debug!(bytes = size_in_bytes, "uploaded tensor to device");

        Ok(DeviceTensor {
            buffer: Arc::new(memory),
            actual_shape: shape.to_vec(),
        })
    }

    fn memory_in_use(&self) -> u64 {
        self.context.memory_tracker.get_current()
    }

    fn memory_available(&self) -> u64 {
        self.context.memory_tracker.get_available()
    }
}
