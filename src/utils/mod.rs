pub mod bytes;
pub mod error;
pub mod math;
pub mod naming;

pub use error::EngineError;
