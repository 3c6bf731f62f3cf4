use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use coordinator_core::models::TaskExecution;
use coordinator_core::traits::TaskExecutionRepository;
use coordinator_core::CoordinatorResult;

pub struct PostgresTaskExecutionRepository {
    pool: PgPool,
}

impl PostgresTaskExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &sqlx::postgres::PgRow) -> CoordinatorResult<TaskExecution> {
        Ok(TaskExecution {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            worker_id: row.try_get("worker_id")?,
            process_id: row.try_get("process_id")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

#[async_trait]
impl TaskExecutionRepository for PostgresTaskExecutionRepository {
    #[instrument(skip(self, execution), fields(execution_id = %execution.id, task_id = execution.task_id))]
    async fn create(&self, execution: &TaskExecution) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_executions (id, task_id, status, started_at, worker_id, process_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&execution.id)
        .bind(execution.task_id)
        .bind(execution.status)
        .bind(execution.started_at)
        .bind(&execution.worker_id)
        .bind(execution.process_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id, status = ?execution.status))]
    async fn finish(&self, execution: &TaskExecution) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            UPDATE task_executions
            SET status = $2, completed_at = $3, duration_ms = $4, result = $5, error_message = $6
            WHERE id = $1
            "#,
        )
        .bind(&execution.id)
        .bind(execution.status)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.result)
        .bind(&execution.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_recent(&self, task_id: i64, limit: i64) -> CoordinatorResult<Vec<TaskExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, status, started_at, completed_at, duration_ms, worker_id, process_id, result, error_message
            FROM task_executions
            WHERE task_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn cleanup_old(&self, days: i32) -> CoordinatorResult<u64> {
        let result = sqlx::query(
            "DELETE FROM task_executions WHERE started_at < NOW() - make_interval(days => $1)",
        )
        .bind(days)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        debug!(deleted, days, "old execution records removed");
        Ok(deleted)
    }
}
