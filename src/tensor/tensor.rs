use std::sync::Arc;

use crate::{
    gpu::AcceleratedBackend,
    tensor::{
        desc::TensorDesc,
        storage::{AcceleratedStorage, HostStorage, TensorStorage},
    },
    utils::error::EngineError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceId {
    Host,
    Accelerated,
}

/// Shaped f32 data living either in host memory or on the accelerated backend.
///
/// Cloning a tensor shares its storage; use [`Tensor::duplicate`] for an
/// independent copy.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub desc: TensorDesc,
    storage: TensorStorage,
}

impl Tensor {
    /// Create a host tensor, checking the element count against the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, EngineError> {
        let desc = TensorDesc::new(shape);
        if desc.num_elements() != data.len() {
            return Err(EngineError::InvalidInput(format!(
                "shape {} needs {} values but {} were given",
                desc,
                desc.num_elements(),
                data.len()
            )));
        }
        Ok(Self {
            desc,
            storage: TensorStorage::Host(HostStorage::new(data)),
        })
    }

    /// Host tensor viewing `len` values of a shared buffer starting at `offset`.
    pub fn from_shared(
        shape: Vec<usize>,
        data: Arc<Vec<f32>>,
        offset: usize,
    ) -> Result<Self, EngineError> {
        let desc = TensorDesc::new(shape);
        let len = desc.num_elements();
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > data.len() {
            return Err(EngineError::InvalidWeightData(format!(
                "view [{}..{}) exceeds buffer of {} values",
                offset,
                end,
                data.len()
            )));
        }
        Ok(Self {
            desc,
            storage: TensorStorage::Host(HostStorage::view(data, offset, len)),
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.desc.dims()
    }

    pub fn len(&self) -> usize {
        self.desc.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn device(&self) -> DeviceId {
        match self.storage {
            TensorStorage::Host(_) => DeviceId::Host,
            TensorStorage::Accelerated(_) => DeviceId::Accelerated,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self.storage, TensorStorage::Host(_))
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self.storage, TensorStorage::Accelerated(_))
    }

    pub fn storage(&self) -> &TensorStorage {
        &self.storage
    }

    /// Borrow host data. Errors for device-resident tensors.
    pub fn host_slice(&self) -> Result<&[f32], EngineError> {
        match &self.storage {
            TensorStorage::Host(host) => Ok(host.as_slice()),
            TensorStorage::Accelerated(_) => Err(EngineError::Backend(
                "tensor is resident on the accelerated backend".to_string(),
            )),
        }
    }

    /// Consume into a flat host vector, downloading if needed.
    pub fn into_vec(self) -> Result<Vec<f32>, EngineError> {
        match self.storage {
            TensorStorage::Host(host) => Ok(host.into_vec()),
            TensorStorage::Accelerated(acc) => acc.download(self.desc.dims()),
        }
    }

    /// Independent copy on the same device.
    pub fn duplicate(&self) -> Result<Self, EngineError> {
        let storage = match &self.storage {
            TensorStorage::Host(host) => TensorStorage::Host(host.deep_copy()),
            TensorStorage::Accelerated(acc) => TensorStorage::Accelerated(acc.duplicate()?),
        };
        Ok(Self {
            desc: self.desc.clone(),
            storage,
        })
    }

    /// Move to host memory. Host tensors are returned unchanged.
    pub fn to_host(self) -> Result<Self, EngineError> {
        match self.storage {
            TensorStorage::Host(_) => Ok(self),
            TensorStorage::Accelerated(acc) => {
                let data = acc.download(self.desc.dims())?;
                Ok(Self {
                    desc: self.desc,
                    storage: TensorStorage::Host(HostStorage::new(data)),
                })
            }
        }
    }

    /// Upload to `backend`. Accelerated tensors are returned unchanged.
    pub fn to_accelerated(self, backend: &dyn AcceleratedBackend) -> Result<Self, EngineError> {
        match &self.storage {
            TensorStorage::Accelerated(_) => Ok(self),
            TensorStorage::Host(host) => {
                let uploaded = backend.upload(host.as_slice(), self.desc.dims())?;
                Ok(Self {
                    desc: self.desc,
                    storage: TensorStorage::Accelerated(AcceleratedStorage::new(
                        uploaded.buffer,
                        uploaded.actual_shape,
                    )),
                })
            }
        }
    }

    pub fn shares_storage_with(&self, other: &Tensor) -> bool {
        match (&self.storage, &other.storage) {
            (TensorStorage::Host(a), TensorStorage::Host(b)) => a.shares_allocation_with(b),
            (TensorStorage::Accelerated(a), TensorStorage::Accelerated(b)) => {
                a.shares_buffer_with(b)
            }
            _ => false,
        }
    }

    /// Reinterpret the shape without touching data. Host only, since device
    /// layouts are padded along the last dimension.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, EngineError> {
        let tensor = self.to_host()?;
        let mut desc = tensor.desc;
        desc.reshape(shape).map_err(EngineError::InvalidInput)?;
        Ok(Self {
            desc,
            storage: tensor.storage,
        })
    }
}
