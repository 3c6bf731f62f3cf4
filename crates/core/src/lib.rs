pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use circuit_breaker::{BreakerState, CircuitBreakerConfig, CircuitBreakerRegistry};
pub use config::AppConfig;
pub use errors::{CoordinatorError, TaskError};
pub use models::{
    DelayedTask, DelayedTaskStatus, ExecutionStatus, QueuePriority, RunOutcome, ScheduledTask,
    TaskExecution,
};
pub use traits::{
    DelayQueueStore, DelayedTaskAuditRepository, LockService, ScheduledJob,
    ScheduledTaskRepository, TaskExecutionRepository, TaskHandler,
};

/// Unified Result type for the coordination layer
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;
