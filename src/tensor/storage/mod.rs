mod accelerated;
mod host;

pub use accelerated::AcceleratedStorage;
pub use host::HostStorage;

#[derive(Clone, Debug)]
pub enum TensorStorage {
    Host(HostStorage),
    Accelerated(AcceleratedStorage),
}

impl TensorStorage {
    pub fn location_string(&self) -> String {
        match self {
            TensorStorage::Host(_) => "Host".to_string(),
            TensorStorage::Accelerated(storage) => {
                format!("Accelerated {:?}", storage.actual_shape())
            }
        }
    }
}
