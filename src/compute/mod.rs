pub mod memory_tracker;
pub mod print_model_stats;
pub mod transfer;

pub use transfer::{TransferPolicy, prepare_input};
