use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::{error, info};

use coordinator_core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use coordinator_core::config::AppConfig;
use coordinator_core::traits::{
    DelayQueueStore, DelayedTaskAuditRepository, LockService, ScheduledJob,
    ScheduledTaskRepository, TaskExecutionRepository, TaskHandler,
};
use coordinator_dispatcher::{
    DelayQueueService, FnJob, JobFuture, SchedulerService, TaskRegistry,
};
use coordinator_infrastructure::{
    PostgresDelayedTaskAuditRepository, PostgresScheduledTaskRepository,
    PostgresTaskExecutionRepository, RedisLockManager, RedisManager, RedisQueueStore,
};

/// Which coordination loops this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// Cron scheduler only
    Scheduler,
    /// Delay queue worker only
    QueueWorker,
    /// Both loops in one process
    All,
}

impl AppMode {
    fn runs_scheduler(&self) -> bool {
        matches!(self, AppMode::Scheduler | AppMode::All)
    }

    fn runs_queue_worker(&self) -> bool {
        matches!(self, AppMode::QueueWorker | AppMode::All)
    }
}

/// Feature wiring handed to the coordination layer at startup.
///
/// Job and handler bodies live with the features that own them (letter
/// delivery, AI replies, notification digests, courier timeout sweeps);
/// the coordination binary only dispatches whatever it is given.
#[derive(Default)]
pub struct Registrations {
    handlers: Vec<Arc<dyn TaskHandler>>,
    jobs: Vec<(String, i32, Arc<dyn ScheduledJob>)>,
}

impl Registrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// A delay-queue handler for one task type.
    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// A recurring job with its cron expression and per-run timeout.
    pub fn with_job(
        mut self,
        cron_expression: &str,
        timeout_seconds: i32,
        job: Arc<dyn ScheduledJob>,
    ) -> Self {
        self.jobs
            .push((cron_expression.to_string(), timeout_seconds, job));
        self
    }
}

pub struct Application {
    mode: AppMode,
    scheduler: Arc<SchedulerService>,
    queue: Arc<DelayQueueService>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode, registrations: Registrations) -> Result<Self> {
        let pool = connect_database(&config).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;
        info!("database migrations applied");

        let redis = RedisManager::connect(&config.redis)
            .await
            .context("failed to connect to redis")?;

        let lock: Arc<dyn LockService> = Arc::new(RedisLockManager::new(&redis));
        let store: Arc<dyn DelayQueueStore> = Arc::new(RedisQueueStore::new(&redis));

        let task_repo: Arc<dyn ScheduledTaskRepository> =
            Arc::new(PostgresScheduledTaskRepository::new(pool.clone()));
        let execution_repo: Arc<dyn TaskExecutionRepository> =
            Arc::new(PostgresTaskExecutionRepository::new(pool.clone()));
        let audit_repo: Arc<dyn DelayedTaskAuditRepository> =
            Arc::new(PostgresDelayedTaskAuditRepository::new(pool.clone()));

        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: config.delay_queue.breaker_failure_threshold,
            open_timeout: Duration::from_secs(config.delay_queue.breaker_open_timeout_seconds),
        }));

        let mut queue = DelayQueueService::new(
            Arc::clone(&store),
            audit_repo,
            breakers,
            config.delay_queue.clone(),
        );
        for handler in registrations.handlers {
            info!(task_type = %handler.task_type(), "task handler registered");
            queue.register_handler(handler);
        }
        let queue = Arc::new(queue);

        let mut registry = TaskRegistry::new();
        for (cron_expression, timeout_seconds, job) in registrations.jobs {
            info!(job = %job.name(), cron = %cron_expression, "scheduled job registered");
            registry.register(&cron_expression, timeout_seconds, job)?;
        }
        register_maintenance_jobs(
            &mut registry,
            Arc::clone(&execution_repo),
            Arc::clone(&store),
            config.scheduler.execution_retention_days,
        )?;

        let scheduler = Arc::new(SchedulerService::new(
            task_repo,
            execution_repo,
            lock,
            Arc::new(registry),
            config.scheduler.clone(),
        ));

        Ok(Self {
            mode,
            scheduler,
            queue,
        })
    }

    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        if self.mode.runs_scheduler() {
            self.scheduler.sync_registered_tasks().await?;
        }

        let mut handles = Vec::new();

        if self.mode.runs_scheduler() {
            let scheduler = Arc::clone(&self.scheduler);
            let rx = shutdown.resubscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = scheduler.run(rx).await {
                    error!(error = %e, "scheduler loop exited with error");
                }
            }));
        }

        if self.mode.runs_queue_worker() {
            let queue = Arc::clone(&self.queue);
            let rx = shutdown.resubscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = queue.run(rx).await {
                    error!(error = %e, "delay queue loop exited with error");
                }
            }));
        }

        for handle in handles {
            handle.await.context("coordination loop panicked")?;
        }
        Ok(())
    }
}

async fn connect_database(config: &AppConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(
            config.database.connection_timeout_seconds,
        ))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_seconds))
        .connect(&config.database.url)
        .await
        .context("failed to connect to postgres")?;
    info!("database connection pool ready");
    Ok(pool)
}

/// Housekeeping jobs every deployment carries: execution history retention
/// and queue depth reporting. Both run under the same lock discipline as
/// feature jobs, so exactly one replica does the work.
fn register_maintenance_jobs(
    registry: &mut TaskRegistry,
    execution_repo: Arc<dyn TaskExecutionRepository>,
    store: Arc<dyn DelayQueueStore>,
    retention_days: i32,
) -> Result<()> {
    registry.register(
        "0 0 3 * * *",
        300,
        Arc::new(FnJob::new("execution_history_cleanup", move || {
            let repo = Arc::clone(&execution_repo);
            let fut: JobFuture = Box::pin(async move {
                let deleted = repo.cleanup_old(retention_days).await?;
                Ok(Some(format!("removed {deleted} execution records")))
            });
            fut
        })),
    )?;

    registry.register(
        "0 */10 * * * *",
        60,
        Arc::new(FnJob::new("delay_queue_monitor", move || {
            let store = Arc::clone(&store);
            let fut: JobFuture = Box::pin(async move {
                let pending = store.pending_count().await?;
                let due = store.due_count(chrono::Utc::now()).await?;
                info!(pending, due, "delay queue depth");
                Ok(Some(format!("pending={pending} due={due}")))
            });
            fut
        })),
    )?;

    Ok(())
}
