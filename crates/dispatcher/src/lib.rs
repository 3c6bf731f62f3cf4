pub mod cron_utils;
pub mod delay_queue;
pub mod registry;
pub mod scheduler;

pub use cron_utils::CronScheduler;
pub use delay_queue::{DelayQueueService, QueueStats, SweepStats};
pub use registry::{FnJob, JobFuture, TaskDefinition, TaskRegistry};
pub use scheduler::{SchedulerService, TaskLockStatus};
