use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{DelayedTask, QueuePriority};
use crate::CoordinatorResult;

/// Storage backend for the delayed / priority task queue.
///
/// The due-time half is an ordered set whose score is the task's due-time in
/// unix seconds; the priority half is a set of named lanes consumed via
/// blocking pop. Implementations are shared by every replica, so `claim`
/// must be atomic: at most one caller may observe `true` for a given member.
#[async_trait]
pub trait DelayQueueStore: Send + Sync {
    /// Insert a serialized task at its due-time score.
    async fn push(&self, task: &DelayedTask) -> CoordinatorResult<()>;

    /// Raw members with score <= `now`, ascending, at most `limit`.
    async fn due_tasks(&self, now: DateTime<Utc>, limit: usize) -> CoordinatorResult<Vec<String>>;

    /// Remove a member from the due-set. `true` means this caller owned the
    /// removal and may execute the task; `false` means another worker (or a
    /// previous sweep) already claimed it.
    async fn claim(&self, member: &str) -> CoordinatorResult<bool>;

    async fn pending_count(&self) -> CoordinatorResult<u64>;

    async fn due_count(&self, now: DateTime<Utc>) -> CoordinatorResult<u64>;

    /// Push a payload onto a named priority lane.
    async fn push_priority(&self, priority: QueuePriority, payload: &str) -> CoordinatorResult<()>;

    /// Blocking pop across all lanes in priority order; `None` on timeout.
    async fn pop_priority(
        &self,
        timeout: Duration,
    ) -> CoordinatorResult<Option<(QueuePriority, String)>>;
}
