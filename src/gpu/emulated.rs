use std::sync::Arc;

use crate::{
    compute::memory_tracker::MemoryTracker, utils::error::EngineError, utils::math::round_up,
};

use super::{AcceleratedBackend, DeviceBuffer, DeviceTensor};

/// Texel width of the emulated device layout. The last dimension of every
/// uploaded tensor is padded up to a multiple of this, the way RGBA texture
/// backed tensors are laid out.
pub const TEXEL_CHANNELS: usize = 4;

pub const DEFAULT_MEMORY_LIMIT: u64 = 512 * 1024 * 1024;

/// Host-memory stand-in for a device backend. It keeps the device layout
/// (padding, budget, explicit copies) so the engine's transfer rules are
/// exercised without a GPU.
#[derive(Debug)]
pub struct EmulatedBackend {
    tracker: Arc<MemoryTracker>,
}

impl EmulatedBackend {
    pub fn new(memory_limit: u64) -> Self {
        Self {
            tracker: Arc::new(MemoryTracker::new(memory_limit)),
        }
    }

    pub fn padded_shape(shape: &[usize]) -> Vec<usize> {
        let mut actual = shape.to_vec();
        match actual.last_mut() {
            Some(last) => *last = round_up(*last, TEXEL_CHANNELS),
            None => actual.push(TEXEL_CHANNELS),
        }
        actual
    }
}

impl AcceleratedBackend for EmulatedBackend {
    fn name(&self) -> &str {
        "emulated"
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

        let actual_shape = Self::padded_shape(shape);
        let row = shape.last().copied().unwrap_or(1);
        let padded_row = *actual_shape.last().unwrap_or(&TEXEL_CHANNELS);
        let rows = if row == 0 { 0 } else { data.len() / row };

        let mut texels = vec![0.0f32; rows.max(1) * padded_row];
        for r in 0..rows {
            texels[r * padded_row..r * padded_row + row]
                .copy_from_slice(&data[r * row..(r + 1) * row]);
        }

        let buffer = EmulatedBuffer::new(texels, self.tracker.clone())?;
        Ok(DeviceTensor {
            buffer: Arc::new(buffer),
            actual_shape,
        })
    }

    fn memory_in_use(&self) -> u64 {
        self.tracker.get_current()
    }

    fn memory_available(&self) -> u64 {
        self.tracker.get_available()
    }
}

#[derive(Debug)]
pub struct EmulatedBuffer {
    texels: Vec<f32>,
    tracker: Arc<MemoryTracker>,
}

impl EmulatedBuffer {
    fn new(texels: Vec<f32>, tracker: Arc<MemoryTracker>) -> Result<Self, EngineError> {
        tracker.allocate((texels.len() * std::mem::size_of::<f32>()) as u64)?;
        Ok(Self { texels, tracker })
    }
}

impl DeviceBuffer for EmulatedBuffer {
    fn len(&self) -> usize {
        self.texels.len()
    }

    fn read(&self) -> Result<Vec<f32>, EngineError> {
        Ok(self.texels.clone())
    }

    fn duplicate(&self) -> Result<Arc<dyn DeviceBuffer>, EngineError> {
        Ok(Arc::new(EmulatedBuffer::new(
            self.texels.clone(),
            self.tracker.clone(),
        )?))
    }
}

impl Drop for EmulatedBuffer {
    fn drop(&mut self) {
        self.tracker
            .deallocate((self.texels.len() * std::mem::size_of::<f32>()) as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_last_dimension_to_texels() {
        let backend = EmulatedBackend::new(1024);
        let uploaded = backend
            .upload(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])
            .unwrap();
        assert_eq!(uploaded.actual_shape, vec![2, 4]);
        assert_eq!(
            uploaded.buffer.read().unwrap(),
            vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0]
        );
    }

    #[test]
    fn releases_memory_on_drop() {
        let backend = EmulatedBackend::new(1024);
        let uploaded = backend.upload(&[1.0; 4], &[4]).unwrap();
        assert_eq!(backend.memory_in_use(), 16);
        assert_eq!(backend.memory_available(), 1024 - 16);
        let copy = uploaded.buffer.duplicate().unwrap();
        assert_eq!(backend.memory_in_use(), 32);
        drop(uploaded);
        drop(copy);
        assert_eq!(backend.memory_in_use(), 0);
        assert_eq!(backend.memory_available(), 1024);
    }

    #[test]
    fn respects_memory_limit() {
        let backend = EmulatedBackend::new(16);
        assert!(backend.upload(&[0.0; 5], &[5]).is_err());
    }
}
