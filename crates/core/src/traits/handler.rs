use async_trait::async_trait;

use crate::errors::TaskError;
use crate::models::DelayedTask;
use crate::CoordinatorResult;

/// Executes one class of delayed task.
///
/// Handlers own their payload shape; the queue core treats the payload as an
/// opaque map. Returning `TaskError::Permanent` skips the retry path
/// entirely (for example when the referenced letter no longer exists).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task class this handler consumes, matched against
    /// `DelayedTask::task_type`.
    fn task_type(&self) -> &str;

    async fn handle(&self, task: &DelayedTask) -> Result<(), TaskError>;
}

/// Body of a cron-scheduled job, dispatched by name from the task registry.
///
/// Job bodies are collaborators outside the coordination layer; the
/// scheduler only cares that they finish, fail, or report a short result
/// payload for the execution record.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> CoordinatorResult<Option<String>>;
}
