pub mod handler;
pub mod lock;
pub mod queue_store;
pub mod repository;

pub use handler::{ScheduledJob, TaskHandler};
pub use lock::{LockRetryConfig, LockService};
pub use queue_store::DelayQueueStore;
pub use repository::{
    DelayedTaskAuditRepository, ScheduledTaskRepository, TaskExecutionRepository,
};
