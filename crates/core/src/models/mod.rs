pub mod delayed_task;
pub mod scheduled_task;
pub mod task_execution;

pub use delayed_task::{DelayedTask, DelayedTaskStatus, QueuePriority};
pub use scheduled_task::{RunOutcome, ScheduledTask};
pub use task_execution::{ExecutionStatus, TaskExecution};
