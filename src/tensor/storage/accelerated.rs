use std::sync::Arc;

use crate::{gpu::DeviceBuffer, utils::error::EngineError};

/// Handle to a tensor resident on the accelerated backend.
///
/// `actual_shape` is the storage layout on the device, which may pad the last
/// dimension past the logical shape.
#[derive(Clone, Debug)]
pub struct AcceleratedStorage {
    buffer: Arc<dyn DeviceBuffer>,
    actual_shape: Vec<usize>,
}

impl AcceleratedStorage {
    pub fn new(buffer: Arc<dyn DeviceBuffer>, actual_shape: Vec<usize>) -> Self {
        Self {
            buffer,
            actual_shape,
        }
    }

    pub fn actual_shape(&self) -> &[usize] {
        &self.actual_shape
    }

    /// Read back to host and strip any row padding so the result has exactly
    /// `product(logical_shape)` elements.
    pub fn download(&self, logical_shape: &[usize]) -> Result<Vec<f32>, EngineError> {
        let raw = self.buffer.read()?;
        let logical: usize = logical_shape.iter().product();

        if self.actual_shape == logical_shape {
            if raw.len() < logical {
                return Err(EngineError::Backend(format!(
                    "device buffer holds {} elements, expected {}",
                    raw.len(),
                    logical
                )));
            }
            let mut raw = raw;
            raw.truncate(logical);
            return Ok(raw);
        }

        let row = logical_shape.last().copied().unwrap_or(1);
        let padded_row = self.actual_shape.last().copied().unwrap_or(row);
        if row == 0 {
            return Ok(Vec::new());
        }
        let rows = logical / row;
        if raw.len() < rows * padded_row {
            return Err(EngineError::Backend(format!(
                "device buffer holds {} elements, expected at least {} for {:?}",
                raw.len(),
                rows * padded_row,
                self.actual_shape
            )));
        }

        let mut out = Vec::with_capacity(logical);
        for r in 0..rows {
            out.extend_from_slice(&raw[r * padded_row..r * padded_row + row]);
        }
        Ok(out)
    }

    /// Copy at the device level, keeping the padded layout.
    pub fn duplicate(&self) -> Result<Self, EngineError> {
        Ok(Self {
            buffer: self.buffer.duplicate()?,
            actual_shape: self.actual_shape.clone(),
        })
    }

    pub fn shares_buffer_with(&self, other: &AcceleratedStorage) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}
