use async_trait::async_trait;

use crate::models::{DelayedTask, DelayedTaskStatus, RunOutcome, ScheduledTask, TaskExecution};
use crate::CoordinatorResult;

/// Persisted scheduled-task configuration and counters
#[async_trait]
pub trait ScheduledTaskRepository: Send + Sync {
    async fn create(&self, task: &ScheduledTask) -> CoordinatorResult<ScheduledTask>;

    async fn get_by_name(&self, name: &str) -> CoordinatorResult<Option<ScheduledTask>>;

    async fn get_active_tasks(&self) -> CoordinatorResult<Vec<ScheduledTask>>;

    /// Apply one execution attempt's outcome: status, counters, last/next
    /// run times. Tasks are never deleted at runtime, only deactivated.
    async fn record_run(&self, name: &str, outcome: &RunOutcome) -> CoordinatorResult<()>;

    async fn set_active(&self, name: &str, active: bool) -> CoordinatorResult<()>;
}

/// Append-only execution audit trail
#[async_trait]
pub trait TaskExecutionRepository: Send + Sync {
    async fn create(&self, execution: &TaskExecution) -> CoordinatorResult<()>;

    /// Write the terminal state of an execution row created by `create`.
    async fn finish(&self, execution: &TaskExecution) -> CoordinatorResult<()>;

    async fn get_recent(&self, task_id: i64, limit: i64) -> CoordinatorResult<Vec<TaskExecution>>;

    async fn cleanup_old(&self, days: i32) -> CoordinatorResult<u64>;
}

/// Durable mirror of delayed tasks for auditability. The sorted set is the
/// operational source of truth; these rows exist so operators can answer
/// "what happened to task X" after it left the queue.
#[async_trait]
pub trait DelayedTaskAuditRepository: Send + Sync {
    async fn record(&self, task: &DelayedTask) -> CoordinatorResult<()>;

    async fn update_status(
        &self,
        id: &str,
        status: DelayedTaskStatus,
        retry_count: i32,
        last_error: Option<&str>,
    ) -> CoordinatorResult<()>;

    async fn get(&self, id: &str) -> CoordinatorResult<Option<DelayedTask>>;
}
