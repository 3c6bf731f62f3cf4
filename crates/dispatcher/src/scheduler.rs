use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use coordinator_core::config::SchedulerConfig;
use coordinator_core::errors::CoordinatorError;
use coordinator_core::models::{RunOutcome, ScheduledTask, TaskExecution};
use coordinator_core::traits::{
    lock, LockService, ScheduledTaskRepository, TaskExecutionRepository,
};
use coordinator_core::CoordinatorResult;

use crate::cron_utils::CronScheduler;
use crate::registry::TaskRegistry;

/// Diagnostic view of one task's lock, for operator tooling
#[derive(Debug, Clone)]
pub struct TaskLockStatus {
    pub task_name: String,
    pub lock_key: String,
    pub holder: Option<String>,
}

/// Cron-driven dispatcher with cross-replica exclusion.
///
/// Every replica runs the same tick loop over the same task table; before a
/// job body executes, the replica must win that task's lock with a single
/// fail-fast attempt. Losing the race is the normal case on all but one
/// replica and is logged at debug.
pub struct SchedulerService {
    task_repo: Arc<dyn ScheduledTaskRepository>,
    execution_repo: Arc<dyn TaskExecutionRepository>,
    lock: Arc<dyn LockService>,
    registry: Arc<TaskRegistry>,
    config: SchedulerConfig,
    worker_id: String,
}

impl SchedulerService {
    pub fn new(
        task_repo: Arc<dyn ScheduledTaskRepository>,
        execution_repo: Arc<dyn TaskExecutionRepository>,
        lock: Arc<dyn LockService>,
        registry: Arc<TaskRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            task_repo,
            execution_repo,
            lock,
            registry,
            config,
            worker_id: worker_identity(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Upsert every registered job into the task table. Safe to call from
    /// all replicas concurrently.
    pub async fn sync_registered_tasks(&self) -> CoordinatorResult<()> {
        for definition in self.registry.definitions() {
            let task = ScheduledTask::new(&definition.name, &definition.cron_expression)
                .with_timeout(definition.timeout_seconds);
            self.task_repo.create(&task).await?;
        }
        info!(
            count = self.registry.len(),
            worker_id = %self.worker_id,
            "scheduled tasks synced"
        );
        Ok(())
    }

    /// Main loop: tick on an interval until shutdown is signalled.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> CoordinatorResult<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            worker_id = %self.worker_id,
            tick_interval = self.config.tick_interval_seconds,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!(worker_id = %self.worker_id, "scheduler stopping");
                    return Ok(());
                }
            }
        }
    }

    /// One pass over the active tasks: trigger everything that is due.
    pub async fn tick(&self) -> CoordinatorResult<usize> {
        let now = Utc::now();
        let tasks = self.task_repo.get_active_tasks().await?;
        let mut triggered = 0;

        for task in tasks {
            let Some((_, _)) = self.registry.get(&task.name) else {
                // Row left over from a job this build no longer registers.
                debug!(task_name = %task.name, "active task has no registered job, skipping");
                continue;
            };

            let cron = match CronScheduler::new(&task.cron_expression) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!(task_name = %task.name, error = %e, "stored cron expression invalid");
                    continue;
                }
            };

            if !cron.should_trigger(task.last_run_at, now) {
                continue;
            }

            match self.execute_task_with_lock(&task, &cron).await {
                Ok(true) => triggered += 1,
                Ok(false) => {}
                Err(e) if e.is_benign() => {
                    debug!(task_name = %task.name, "another replica holds the task lock");
                }
                Err(e) => {
                    error!(task_name = %task.name, error = %e, "task execution failed");
                }
            }
        }

        Ok(triggered)
    }

    /// Run one task under its lock. Returns `Ok(false)` when another replica
    /// already holds the lock, `Ok(true)` after a guarded run (successful or
    /// not; job failures are recorded, not propagated).
    #[instrument(skip(self, task, cron), fields(task_name = %task.name, worker_id = %self.worker_id))]
    async fn execute_task_with_lock(
        &self,
        task: &ScheduledTask,
        cron: &CronScheduler,
    ) -> CoordinatorResult<bool> {
        let ttl = task.lock_ttl();
        let Some(token) = self.lock.try_acquire(&task.lock_key(), ttl).await? else {
            return Ok(false);
        };

        let (_, job) = self
            .registry
            .get(&task.name)
            .ok_or_else(|| CoordinatorError::TaskNotFound {
                name: task.name.clone(),
            })?;

        let mut execution = TaskExecution::begin(task.id, &self.worker_id);
        self.execution_repo.create(&execution).await?;
        info!(execution_id = %execution.id, "task execution started");

        let extend_every = Duration::from_secs(self.config.lock_extend_interval_seconds);
        let job_timeout = Duration::from_secs(task.timeout_seconds.max(1) as u64);
        let result = lock::extend_while_running(
            Arc::clone(&self.lock),
            &task.lock_key(),
            &token,
            ttl,
            extend_every,
            || async move {
                match tokio::time::timeout(job_timeout, job.run()).await {
                    Ok(result) => result,
                    Err(_) => Err(CoordinatorError::TaskExecution(format!(
                        "timed out after {}s",
                        job_timeout.as_secs()
                    ))),
                }
            },
        )
        .await;

        let ran_at = Utc::now();
        match &result {
            Ok(output) => execution.complete(output.clone()),
            Err(e) => execution.fail(e.to_string()),
        }
        self.execution_repo.finish(&execution).await?;

        let outcome = RunOutcome {
            status: execution.status,
            error: execution.error_message.clone(),
            ran_at,
            next_run_at: cron.next_execution_time(ran_at),
        };
        self.task_repo.record_run(&task.name, &outcome).await?;

        match result {
            Ok(_) => info!(
                execution_id = %execution.id,
                duration_ms = execution.duration_ms,
                "task execution completed"
            ),
            Err(e) => warn!(
                execution_id = %execution.id,
                error = %e,
                "task execution failed"
            ),
        }
        Ok(true)
    }

    /// Lock holders for every registered task, for operator inspection.
    pub async fn lock_status(&self) -> CoordinatorResult<Vec<TaskLockStatus>> {
        let mut statuses = Vec::new();
        for definition in self.registry.definitions() {
            let lock_key = format!("scheduler:task:{}", definition.name);
            let holder = self.lock.get_holder(&lock_key).await?;
            statuses.push(TaskLockStatus {
                task_name: definition.name,
                lock_key,
                holder,
            });
        }
        Ok(statuses)
    }

    /// Manual recovery: drop a task's lock regardless of holder.
    pub async fn force_release_lock(&self, task_name: &str) -> CoordinatorResult<bool> {
        let lock_key = format!("scheduler:task:{task_name}");
        let released = self.lock.force_release(&lock_key).await?;
        if released {
            warn!(task_name = %task_name, worker_id = %self.worker_id, "task lock force released");
        }
        Ok(released)
    }

    pub async fn cleanup_old_executions(&self) -> CoordinatorResult<u64> {
        self.execution_repo
            .cleanup_old(self.config.execution_retention_days)
            .await
    }
}

/// Stable identity of this replica, recorded on every execution row.
fn worker_identity() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{host}:{}", std::process::id())
}
