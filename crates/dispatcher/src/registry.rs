use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use coordinator_core::errors::CoordinatorError;
use coordinator_core::traits::ScheduledJob;
use coordinator_core::CoordinatorResult;

use crate::cron_utils::CronScheduler;

/// Static configuration for one registered task: how often it fires and how
/// long one run may hold the lock.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub cron_expression: String,
    pub timeout_seconds: i32,
}

/// In-process catalogue of scheduled jobs.
///
/// Registration is code-driven at startup; the database rows are synced from
/// this registry, never the other way around. Every replica registers the
/// same set, and the per-task lock decides who runs.
#[derive(Default)]
pub struct TaskRegistry {
    jobs: HashMap<String, RegisteredJob>,
}

struct RegisteredJob {
    definition: TaskDefinition,
    job: Arc<dyn ScheduledJob>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        cron_expression: &str,
        timeout_seconds: i32,
        job: Arc<dyn ScheduledJob>,
    ) -> CoordinatorResult<()> {
        CronScheduler::validate_cron_expression(cron_expression)?;
        let name = job.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(CoordinatorError::Internal(format!(
                "scheduled job already registered: {name}"
            )));
        }
        self.jobs.insert(
            name.clone(),
            RegisteredJob {
                definition: TaskDefinition {
                    name,
                    cron_expression: cron_expression.to_string(),
                    timeout_seconds,
                },
                job,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<(&TaskDefinition, Arc<dyn ScheduledJob>)> {
        self.jobs
            .get(name)
            .map(|r| (&r.definition, Arc::clone(&r.job)))
    }

    pub fn definitions(&self) -> Vec<TaskDefinition> {
        self.jobs.values().map(|r| r.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = CoordinatorResult<Option<String>>> + Send>>;

/// Adapter turning a closure into a [`ScheduledJob`], for jobs that do not
/// warrant their own type.
pub struct FnJob<F> {
    name: String,
    f: F,
}

impl<F> FnJob<F>
where
    F: Fn() -> JobFuture + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> ScheduledJob for FnJob<F>
where
    F: Fn() -> JobFuture + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> CoordinatorResult<Option<String>> {
        (self.f)().await
    }
}
