pub mod execution_plan;
pub mod execution_state;

pub use execution_plan::{ExecutionPlan, NodeId, create_execution_plan};
pub use execution_state::{ExecutionOutcome, ScheduleOptions, execute_plan};
