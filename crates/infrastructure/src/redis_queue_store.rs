use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use coordinator_core::errors::CoordinatorError;
use coordinator_core::models::{DelayedTask, QueuePriority};
use coordinator_core::traits::DelayQueueStore;
use coordinator_core::CoordinatorResult;

use crate::redis_manager::RedisManager;

/// Redis-backed [`DelayQueueStore`].
///
/// Delayed tasks live in one sorted set keyed by due-time; priority lanes
/// are plain lists consumed with `BRPOP`, which scans the lane keys in the
/// order given so express drains before urgent, urgent before normal.
pub struct RedisQueueStore {
    connection: ConnectionManager,
    delayed_key: String,
    lane_keys: Vec<(QueuePriority, String)>,
}

impl RedisQueueStore {
    pub fn new(manager: &RedisManager) -> Self {
        let lane_keys = QueuePriority::all()
            .into_iter()
            .map(|p| (p, manager.namespaced(&format!("queue:{}", p.as_str()))))
            .collect();
        Self {
            connection: manager.connection(),
            delayed_key: manager.namespaced("delay_queue"),
            lane_keys,
        }
    }
}

#[async_trait]
impl DelayQueueStore for RedisQueueStore {
    async fn push(&self, task: &DelayedTask) -> CoordinatorResult<()> {
        let member = serde_json::to_string(task)?;
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .zadd(&self.delayed_key, member, task.due_score())
            .await
            .map_err(|e| CoordinatorError::Redis(format!("delay queue push failed: {e}")))?;
        debug!(task_id = %task.id, task_type = %task.task_type, score = task.due_score(), "task queued");
        Ok(())
    }

    async fn due_tasks(&self, now: DateTime<Utc>, limit: usize) -> CoordinatorResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .zrangebyscore_limit(&self.delayed_key, 0, now.timestamp(), 0, limit as isize)
            .await
            .map_err(|e| CoordinatorError::Redis(format!("delay queue scan failed: {e}")))?;
        Ok(members)
    }

    async fn claim(&self, member: &str) -> CoordinatorResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn
            .zrem(&self.delayed_key, member)
            .await
            .map_err(|e| CoordinatorError::Redis(format!("delay queue claim failed: {e}")))?;
        Ok(removed > 0)
    }

    async fn pending_count(&self) -> CoordinatorResult<u64> {
        let mut conn = self.connection.clone();
        let count: u64 = conn
            .zcard(&self.delayed_key)
            .await
            .map_err(|e| CoordinatorError::Redis(format!("delay queue count failed: {e}")))?;
        Ok(count)
    }

    async fn due_count(&self, now: DateTime<Utc>) -> CoordinatorResult<u64> {
        let mut conn = self.connection.clone();
        let count: u64 = conn
            .zcount(&self.delayed_key, 0, now.timestamp())
            .await
            .map_err(|e| CoordinatorError::Redis(format!("delay queue due count failed: {e}")))?;
        Ok(count)
    }

    async fn push_priority(&self, priority: QueuePriority, payload: &str) -> CoordinatorResult<()> {
        let key = self
            .lane_keys
            .iter()
            .find(|(p, _)| *p == priority)
            .map(|(_, k)| k.clone())
            .unwrap_or_else(|| format!("queue:{}", priority.as_str()));
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .lpush(&key, payload)
            .await
            .map_err(|e| CoordinatorError::Redis(format!("priority push failed: {e}")))?;
        Ok(())
    }

    async fn pop_priority(
        &self,
        timeout: Duration,
    ) -> CoordinatorResult<Option<(QueuePriority, String)>> {
        let keys: Vec<&str> = self.lane_keys.iter().map(|(_, k)| k.as_str()).collect();
        let mut conn = self.connection.clone();
        let popped: Option<(String, String)> = conn
            .brpop(keys, timeout.as_secs_f64())
            .await
            .map_err(|e| CoordinatorError::Redis(format!("priority pop failed: {e}")))?;

        match popped {
            Some((key, payload)) => {
                let priority = self
                    .lane_keys
                    .iter()
                    .find(|(_, k)| *k == key)
                    .map(|(p, _)| *p)
                    .ok_or_else(|| {
                        CoordinatorError::Redis(format!("BRPOP returned unknown lane key: {key}"))
                    })?;
                Ok(Some((priority, payload)))
            }
            None => Ok(None),
        }
    }
}
