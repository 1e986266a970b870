mod desc;
pub use desc::TensorDesc;
pub mod storage;
mod tensor;
pub use tensor::{DeviceId, Tensor};
