use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use coordinator_core::config::SchedulerConfig;
use coordinator_core::errors::CoordinatorError;
use coordinator_core::models::{ExecutionStatus, RunOutcome, ScheduledTask, TaskExecution};
use coordinator_core::traits::{
    LockService, ScheduledJob, ScheduledTaskRepository, TaskExecutionRepository,
};
use coordinator_core::CoordinatorResult;
use coordinator_dispatcher::{SchedulerService, TaskRegistry};
use coordinator_infrastructure::InMemoryLockService;

#[derive(Default)]
struct InMemoryTaskRepo {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    next_id: AtomicUsize,
}

impl InMemoryTaskRepo {
    fn get(&self, name: &str) -> Option<ScheduledTask> {
        self.tasks.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl ScheduledTaskRepository for InMemoryTaskRepo {
    async fn create(&self, task: &ScheduledTask) -> CoordinatorResult<ScheduledTask> {
        let mut tasks = self.tasks.lock().unwrap();
        let stored = tasks
            .entry(task.name.clone())
            .and_modify(|existing| {
                existing.cron_expression = task.cron_expression.clone();
                existing.timeout_seconds = task.timeout_seconds;
            })
            .or_insert_with(|| {
                let mut new_task = task.clone();
                new_task.id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
                new_task
            });
        Ok(stored.clone())
    }

    async fn get_by_name(&self, name: &str) -> CoordinatorResult<Option<ScheduledTask>> {
        Ok(self.get(name))
    }

    async fn get_active_tasks(&self) -> CoordinatorResult<Vec<ScheduledTask>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.is_active)
            .cloned()
            .collect())
    }

    async fn record_run(&self, name: &str, outcome: &RunOutcome) -> CoordinatorResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(name)
            .ok_or_else(|| CoordinatorError::TaskNotFound {
                name: name.to_string(),
            })?;
        task.last_run_at = Some(outcome.ran_at);
        task.next_run_at = outcome.next_run_at;
        task.last_status = Some(outcome.status);
        task.last_error = outcome.error.clone();
        task.run_count += 1;
        if !outcome.succeeded() {
            task.failure_count += 1;
        }
        Ok(())
    }

    async fn set_active(&self, name: &str, active: bool) -> CoordinatorResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(name)
            .ok_or_else(|| CoordinatorError::TaskNotFound {
                name: name.to_string(),
            })?;
        task.is_active = active;
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryExecutionRepo {
    executions: Mutex<Vec<TaskExecution>>,
}

impl InMemoryExecutionRepo {
    fn all(&self) -> Vec<TaskExecution> {
        self.executions.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutionRepository for InMemoryExecutionRepo {
    async fn create(&self, execution: &TaskExecution) -> CoordinatorResult<()> {
        self.executions.lock().unwrap().push(execution.clone());
        Ok(())
    }

    async fn finish(&self, execution: &TaskExecution) -> CoordinatorResult<()> {
        let mut executions = self.executions.lock().unwrap();
        if let Some(row) = executions.iter_mut().find(|e| e.id == execution.id) {
            *row = execution.clone();
        }
        Ok(())
    }

    async fn get_recent(&self, task_id: i64, limit: i64) -> CoordinatorResult<Vec<TaskExecution>> {
        let executions = self.executions.lock().unwrap();
        let mut recent: Vec<TaskExecution> = executions
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        recent.truncate(limit as usize);
        Ok(recent)
    }

    async fn cleanup_old(&self, days: i32) -> CoordinatorResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let mut executions = self.executions.lock().unwrap();
        let before = executions.len();
        executions.retain(|e| e.started_at >= cutoff);
        Ok((before - executions.len()) as u64)
    }
}

struct CountingJob {
    name: &'static str,
    calls: AtomicUsize,
    fail: bool,
    hold: Duration,
}

impl CountingJob {
    fn new(name: &'static str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            fail,
            hold: Duration::ZERO,
        })
    }

    /// A job that keeps the lock held for `hold` before finishing.
    fn slow(name: &'static str, hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            fail: false,
            hold,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduledJob for CountingJob {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self) -> CoordinatorResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        if self.fail {
            Err(CoordinatorError::TaskExecution(
                "delivery backend unavailable".to_string(),
            ))
        } else {
            Ok(Some("delivered 3 letters".to_string()))
        }
    }
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        enabled: true,
        tick_interval_seconds: 1,
        lock_extend_interval_seconds: 10,
        execution_retention_days: 30,
    }
}

struct Harness {
    task_repo: Arc<InMemoryTaskRepo>,
    execution_repo: Arc<InMemoryExecutionRepo>,
    lock: Arc<InMemoryLockService>,
    scheduler: SchedulerService,
}

fn harness(job: Arc<CountingJob>, cron: &str) -> Harness {
    let task_repo = Arc::new(InMemoryTaskRepo::default());
    let execution_repo = Arc::new(InMemoryExecutionRepo::default());
    let lock = Arc::new(InMemoryLockService::new());
    let mut registry = TaskRegistry::new();
    registry.register(cron, 300, job).unwrap();

    let scheduler = SchedulerService::new(
        task_repo.clone() as Arc<dyn ScheduledTaskRepository>,
        execution_repo.clone() as Arc<dyn TaskExecutionRepository>,
        lock.clone() as Arc<dyn LockService>,
        Arc::new(registry),
        test_config(),
    );
    Harness {
        task_repo,
        execution_repo,
        lock,
        scheduler,
    }
}

#[tokio::test]
async fn test_sync_registered_tasks_creates_rows() {
    let job = CountingJob::new("future_letter_delivery", false);
    let h = harness(job, "0 */5 * * * *");

    h.scheduler.sync_registered_tasks().await.unwrap();

    let task = h.task_repo.get("future_letter_delivery").unwrap();
    assert_eq!(task.cron_expression, "0 */5 * * * *");
    assert_eq!(task.timeout_seconds, 300);
    assert!(task.is_active);

    // Re-syncing (another replica starting) does not duplicate.
    h.scheduler.sync_registered_tasks().await.unwrap();
    assert_eq!(h.task_repo.tasks.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_tick_runs_due_task_and_records_outcome() {
    let job = CountingJob::new("future_letter_delivery", false);
    let h = harness(job.clone(), "0 * * * * *");

    h.scheduler.sync_registered_tasks().await.unwrap();

    let triggered = h.scheduler.tick().await.unwrap();
    assert_eq!(triggered, 1);
    assert_eq!(job.calls(), 1);

    let task = h.task_repo.get("future_letter_delivery").unwrap();
    assert_eq!(task.run_count, 1);
    assert_eq!(task.failure_count, 0);
    assert_eq!(task.last_status, Some(ExecutionStatus::Completed));
    assert!(task.last_run_at.is_some());
    assert!(task.next_run_at.unwrap() > task.last_run_at.unwrap());

    let executions = h.execution_repo.all();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Completed);
    assert_eq!(executions[0].result.as_deref(), Some("delivered 3 letters"));
    assert!(executions[0].duration_ms.is_some());

    // The lock was released after the run.
    assert!(h
        .lock
        .get_holder("scheduler:task:future_letter_delivery")
        .await
        .unwrap()
        .is_none());

    // Just-run task is not due again on the immediate next tick.
    let triggered = h.scheduler.tick().await.unwrap();
    assert_eq!(triggered, 0);
    assert_eq!(job.calls(), 1);
}

#[tokio::test]
async fn test_held_lock_skips_execution() {
    let job = CountingJob::new("future_letter_delivery", false);
    let h = harness(job.clone(), "0 * * * * *");
    h.scheduler.sync_registered_tasks().await.unwrap();

    // Another replica holds the task lock.
    let token = h
        .lock
        .try_acquire(
            "scheduler:task:future_letter_delivery",
            Duration::from_secs(60),
        )
        .await
        .unwrap()
        .unwrap();

    let triggered = h.scheduler.tick().await.unwrap();
    assert_eq!(triggered, 0);
    assert_eq!(job.calls(), 0);
    assert!(h.execution_repo.all().is_empty());

    h.lock
        .release("scheduler:task:future_letter_delivery", &token)
        .await
        .unwrap();
    let triggered = h.scheduler.tick().await.unwrap();
    assert_eq!(triggered, 1);
    assert_eq!(job.calls(), 1);
}

#[tokio::test]
async fn test_failing_job_records_failure() {
    let job = CountingJob::new("ai_reply_generation", true);
    let h = harness(job.clone(), "0 * * * * *");
    h.scheduler.sync_registered_tasks().await.unwrap();

    let triggered = h.scheduler.tick().await.unwrap();
    assert_eq!(triggered, 1);

    let task = h.task_repo.get("ai_reply_generation").unwrap();
    assert_eq!(task.run_count, 1);
    assert_eq!(task.failure_count, 1);
    assert_eq!(task.last_status, Some(ExecutionStatus::Failed));
    assert!(task.last_error.as_deref().unwrap().contains("unavailable"));

    let executions = h.execution_repo.all();
    assert_eq!(executions[0].status, ExecutionStatus::Failed);
    assert!(executions[0].error_message.is_some());
}

#[tokio::test]
async fn test_inactive_task_is_not_triggered() {
    let job = CountingJob::new("notification_digest", false);
    let h = harness(job.clone(), "0 * * * * *");
    h.scheduler.sync_registered_tasks().await.unwrap();
    h.task_repo
        .set_active("notification_digest", false)
        .await
        .unwrap();

    let triggered = h.scheduler.tick().await.unwrap();
    assert_eq!(triggered, 0);
    assert_eq!(job.calls(), 0);
}

#[tokio::test]
async fn test_two_replicas_run_a_due_task_exactly_once() {
    let job = CountingJob::slow("future_letter_delivery", Duration::from_millis(50));
    let task_repo = Arc::new(InMemoryTaskRepo::default());
    let execution_repo = Arc::new(InMemoryExecutionRepo::default());
    let lock = Arc::new(InMemoryLockService::new());

    let make_replica = |job: Arc<CountingJob>| {
        let mut registry = TaskRegistry::new();
        registry.register("0 * * * * *", 300, job).unwrap();
        SchedulerService::new(
            task_repo.clone() as Arc<dyn ScheduledTaskRepository>,
            execution_repo.clone() as Arc<dyn TaskExecutionRepository>,
            lock.clone() as Arc<dyn LockService>,
            Arc::new(registry),
            test_config(),
        )
    };
    let replica_a = make_replica(job.clone());
    let replica_b = make_replica(job.clone());

    replica_a.sync_registered_tasks().await.unwrap();
    replica_b.sync_registered_tasks().await.unwrap();

    // Both replicas see the same due task; the lock decides who runs it.
    let (a, b) = tokio::join!(replica_a.tick(), replica_b.tick());
    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert_eq!(job.calls(), 1);
    assert_eq!(execution_repo.all().len(), 1);

    let task = task_repo.get("future_letter_delivery").unwrap();
    assert_eq!(task.run_count, 1);
}

#[tokio::test]
async fn test_lock_status_and_force_release() {
    let job = CountingJob::new("future_letter_delivery", false);
    let h = harness(job, "0 * * * * *");
    h.scheduler.sync_registered_tasks().await.unwrap();

    let statuses = h.scheduler.lock_status().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].holder.is_none());

    h.lock
        .try_acquire(
            "scheduler:task:future_letter_delivery",
            Duration::from_secs(600),
        )
        .await
        .unwrap()
        .unwrap();

    let statuses = h.scheduler.lock_status().await.unwrap();
    assert!(statuses[0].holder.is_some());

    assert!(h
        .scheduler
        .force_release_lock("future_letter_delivery")
        .await
        .unwrap());
    let statuses = h.scheduler.lock_status().await.unwrap();
    assert!(statuses[0].holder.is_none());
}
