use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use coordinator_core::circuit_breaker::CircuitBreakerRegistry;
use coordinator_core::config::DelayQueueConfig;
use coordinator_core::errors::{CoordinatorError, TaskError};
use coordinator_core::models::{DelayedTask, DelayedTaskStatus, QueuePriority};
use coordinator_core::traits::{DelayQueueStore, DelayedTaskAuditRepository, TaskHandler};
use coordinator_core::CoordinatorResult;

/// Counters from one sweep of the due set
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub executed: usize,
    pub retried: usize,
    pub failed: usize,
    pub permanently_failed: usize,
    pub circuit_broken: usize,
    pub lost_races: usize,
    pub dropped: usize,
}

/// Point-in-time queue depth, for monitoring jobs
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub pending: u64,
    pub due: u64,
}

/// Delayed-task dispatch with retries and per-key circuit breaking.
///
/// Tasks sit in the shared due-time set until a sweep finds them due. A task
/// is executed only after `claim` removes its entry, so when several workers
/// sweep concurrently each due task runs on exactly one of them. Retries
/// re-insert a fresh entry with a bumped count and quadratic back-off.
pub struct DelayQueueService {
    store: Arc<dyn DelayQueueStore>,
    audit: Arc<dyn DelayedTaskAuditRepository>,
    breakers: Arc<CircuitBreakerRegistry>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    config: DelayQueueConfig,
}

impl DelayQueueService {
    pub fn new(
        store: Arc<dyn DelayQueueStore>,
        audit: Arc<dyn DelayedTaskAuditRepository>,
        breakers: Arc<CircuitBreakerRegistry>,
        config: DelayQueueConfig,
    ) -> Self {
        Self {
            store,
            audit,
            breakers,
            handlers: HashMap::new(),
            config,
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .insert(handler.task_type().to_string(), handler);
    }

    /// Schedule a task for later execution.
    ///
    /// Rejected up front when the task's breaker is open; the caller decides
    /// whether to surface that or queue elsewhere.
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    pub async fn schedule(&self, task: &DelayedTask) -> CoordinatorResult<()> {
        self.breakers.allow(&task.breaker_key).await?;
        self.store.push(task).await?;
        self.audit.record(task).await?;
        info!(
            execute_at = %task.execute_at,
            breaker_key = %task.breaker_key,
            "delayed task scheduled"
        );
        Ok(())
    }

    /// Worker loop: sweep the due set on an interval until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> CoordinatorResult<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            poll_interval = self.config.poll_interval_seconds,
            batch_size = self.config.batch_size,
            "delay queue worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(stats) if stats.executed > 0 || stats.dropped > 0 => {
                            info!(?stats, "sweep finished");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "sweep failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("delay queue worker stopping");
                    return Ok(());
                }
            }
        }
    }

    /// One pass over the due tasks.
    pub async fn sweep(&self) -> CoordinatorResult<SweepStats> {
        let now = Utc::now();
        let members = self.store.due_tasks(now, self.config.batch_size).await?;
        let mut stats = SweepStats::default();

        for member in members {
            let task: DelayedTask = match serde_json::from_str(&member) {
                Ok(task) => task,
                Err(e) => {
                    // Poison entry: drop it from the set so it cannot wedge
                    // every future sweep.
                    warn!(error = %e, "dropping undecodable queue entry");
                    self.store.claim(&member).await?;
                    stats.dropped += 1;
                    continue;
                }
            };

            if let Err(CoordinatorError::CircuitOpen { .. }) =
                self.breakers.allow(&task.breaker_key).await
            {
                // Evict rather than leave it due: the entry would otherwise
                // be rescanned every sweep for the whole open window.
                if self.store.claim(&member).await? {
                    self.audit
                        .update_status(
                            &task.id,
                            DelayedTaskStatus::CircuitBroken,
                            task.retry_count,
                            Some("circuit breaker open"),
                        )
                        .await?;
                    warn!(
                        task_id = %task.id,
                        breaker_key = %task.breaker_key,
                        "task evicted, circuit open"
                    );
                    stats.circuit_broken += 1;
                }
                continue;
            }

            // Claim before executing; losing means another worker owns it.
            if !self.store.claim(&member).await? {
                stats.lost_races += 1;
                continue;
            }

            match self.execute(task).await? {
                ExecutionResult::Completed => stats.executed += 1,
                ExecutionResult::Retried => stats.retried += 1,
                ExecutionResult::Failed => stats.failed += 1,
                ExecutionResult::PermanentlyFailed => stats.permanently_failed += 1,
            }
        }

        Ok(stats)
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type, retry_count = task.retry_count))]
    async fn execute(&self, mut task: DelayedTask) -> CoordinatorResult<ExecutionResult> {
        let Some(handler) = self.handlers.get(&task.task_type) else {
            // No handler in this build: permanent, retrying cannot help.
            self.audit
                .update_status(
                    &task.id,
                    DelayedTaskStatus::PermanentlyFailed,
                    task.retry_count,
                    Some("no handler registered for task type"),
                )
                .await?;
            error!("no handler registered for task type");
            return Ok(ExecutionResult::PermanentlyFailed);
        };

        match handler.handle(&task).await {
            Ok(()) => {
                self.breakers.record_success(&task.breaker_key).await;
                self.audit
                    .update_status(&task.id, DelayedTaskStatus::Completed, task.retry_count, None)
                    .await?;
                debug!("delayed task completed");
                Ok(ExecutionResult::Completed)
            }
            Err(TaskError::Permanent(msg)) => {
                // Permanent failures skip the retry path but still count
                // against the breaker, guarding sibling tasks on the same
                // class and resource.
                self.breakers.record_failure(&task.breaker_key).await;
                self.audit
                    .update_status(
                        &task.id,
                        DelayedTaskStatus::PermanentlyFailed,
                        task.retry_count,
                        Some(&msg),
                    )
                    .await?;
                warn!(error = %msg, "delayed task permanently failed");
                Ok(ExecutionResult::PermanentlyFailed)
            }
            Err(TaskError::Transient(msg)) => {
                self.breakers.record_failure(&task.breaker_key).await;
                self.retry_or_fail(&mut task, &msg).await
            }
        }
    }

    async fn retry_or_fail(
        &self,
        task: &mut DelayedTask,
        error: &str,
    ) -> CoordinatorResult<ExecutionResult> {
        if task.retries_exhausted() {
            self.audit
                .update_status(
                    &task.id,
                    DelayedTaskStatus::Failed,
                    task.retry_count,
                    Some(error),
                )
                .await?;
            warn!(
                task_id = %task.id,
                retry_count = task.retry_count,
                error = %error,
                "delayed task failed, retries exhausted"
            );
            return Ok(ExecutionResult::Failed);
        }

        let base = chrono::Duration::seconds(self.config.retry_base_seconds);
        task.reschedule_after_failure(base, error);
        self.store.push(task).await?;
        self.audit.record(task).await?;
        info!(
            task_id = %task.id,
            retry_count = task.retry_count,
            next_attempt = %task.execute_at,
            "delayed task rescheduled"
        );
        Ok(ExecutionResult::Retried)
    }

    pub async fn queue_stats(&self) -> CoordinatorResult<QueueStats> {
        Ok(QueueStats {
            pending: self.store.pending_count().await?,
            due: self.store.due_count(Utc::now()).await?,
        })
    }

    /// Immediate dispatch onto a named priority lane, bypassing the delay
    /// set entirely.
    pub async fn enqueue_priority(
        &self,
        priority: QueuePriority,
        payload: &str,
    ) -> CoordinatorResult<()> {
        self.store.push_priority(priority, payload).await
    }

    /// Blocking pop for lane consumers; express drains before urgent,
    /// urgent before normal.
    pub async fn next_priority_task(
        &self,
        timeout: Duration,
    ) -> CoordinatorResult<Option<(QueuePriority, String)>> {
        self.store.pop_priority(timeout).await
    }
}

enum ExecutionResult {
    Completed,
    Retried,
    /// Transient failure with the retry budget spent
    Failed,
    /// Unrunnable regardless of retries
    PermanentlyFailed,
}
