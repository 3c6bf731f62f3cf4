use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use coordinator_core::errors::CoordinatorError;
use coordinator_core::models::{RunOutcome, ScheduledTask};
use coordinator_core::traits::ScheduledTaskRepository;
use coordinator_core::CoordinatorResult;

pub struct PostgresScheduledTaskRepository {
    pool: PgPool,
}

impl PostgresScheduledTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> CoordinatorResult<ScheduledTask> {
        Ok(ScheduledTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            cron_expression: row.try_get("cron_expression")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            is_active: row.try_get("is_active")?,
            last_run_at: row.try_get("last_run_at")?,
            next_run_at: row.try_get("next_run_at")?,
            last_status: row.try_get("last_status")?,
            last_error: row.try_get("last_error")?,
            run_count: row.try_get("run_count")?,
            failure_count: row.try_get("failure_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const TASK_COLUMNS: &str = "id, name, cron_expression, timeout_seconds, is_active, last_run_at, next_run_at, last_status, last_error, run_count, failure_count, created_at, updated_at";

#[async_trait]
impl ScheduledTaskRepository for PostgresScheduledTaskRepository {
    #[instrument(skip(self, task), fields(task_name = %task.name))]
    async fn create(&self, task: &ScheduledTask) -> CoordinatorResult<ScheduledTask> {
        // Upsert on name so replicas can register the same built-in tasks at
        // startup without racing each other.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO scheduled_tasks (name, cron_expression, timeout_seconds, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET cron_expression = EXCLUDED.cron_expression,
                timeout_seconds = EXCLUDED.timeout_seconds,
                updated_at = NOW()
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(&task.name)
        .bind(&task.cron_expression)
        .bind(task.timeout_seconds)
        .bind(task.is_active)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_task(&row)?;
        debug!(task_name = %created.name, task_id = created.id, "scheduled task registered");
        Ok(created)
    }

    async fn get_by_name(&self, name: &str) -> CoordinatorResult<Option<ScheduledTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn get_active_tasks(&self) -> CoordinatorResult<Vec<ScheduledTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE is_active = TRUE ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, outcome), fields(task_name = %name, status = ?outcome.status))]
    async fn record_run(&self, name: &str, outcome: &RunOutcome) -> CoordinatorResult<()> {
        let failure_increment: i64 = if outcome.succeeded() { 0 } else { 1 };

        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET last_run_at = $2,
                next_run_at = $3,
                last_status = $4,
                last_error = $5,
                run_count = run_count + 1,
                failure_count = failure_count + $6,
                updated_at = NOW()
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(outcome.ran_at)
        .bind(outcome.next_run_at)
        .bind(outcome.status)
        .bind(&outcome.error)
        .bind(failure_increment)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoordinatorError::TaskNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn set_active(&self, name: &str, active: bool) -> CoordinatorResult<()> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET is_active = $2, updated_at = NOW() WHERE name = $1",
        )
        .bind(name)
        .bind(active)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoordinatorError::TaskNotFound {
                name: name.to_string(),
            });
        }
        debug!(task_name = %name, active, "scheduled task activation changed");
        Ok(())
    }
}
