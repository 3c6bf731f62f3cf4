use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use coordinator_core::models::{DelayedTask, DelayedTaskStatus};
use coordinator_core::traits::DelayedTaskAuditRepository;
use coordinator_core::CoordinatorResult;

/// Durable mirror of the delay queue. Upserted on every state change so the
/// row always reflects the latest attempt, even after the member has left
/// the sorted set.
pub struct PostgresDelayedTaskAuditRepository {
    pool: PgPool,
}

impl PostgresDelayedTaskAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> CoordinatorResult<DelayedTask> {
        let payload: serde_json::Value = row.try_get("payload")?;
        Ok(DelayedTask {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            payload: serde_json::from_value(payload)?,
            execute_at: row.try_get("execute_at")?,
            created_at: row.try_get("created_at")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            breaker_key: row.try_get("breaker_key")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

#[async_trait]
impl DelayedTaskAuditRepository for PostgresDelayedTaskAuditRepository {
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    async fn record(&self, task: &DelayedTask) -> CoordinatorResult<()> {
        let payload = serde_json::to_value(&task.payload)?;
        sqlx::query(
            r#"
            INSERT INTO delayed_task_audits (id, task_type, payload, execute_at, created_at, status, retry_count, max_retries, breaker_key, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
            SET execute_at = EXCLUDED.execute_at,
                status = EXCLUDED.status,
                retry_count = EXCLUDED.retry_count,
                last_error = EXCLUDED.last_error,
                updated_at = NOW()
            "#,
        )
        .bind(&task.id)
        .bind(&task.task_type)
        .bind(payload)
        .bind(task.execute_at)
        .bind(task.created_at)
        .bind(task.status)
        .bind(task.retry_count)
        .bind(task.max_retries)
        .bind(&task.breaker_key)
        .bind(&task.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id, status = ?status))]
    async fn update_status(
        &self,
        id: &str,
        status: DelayedTaskStatus,
        retry_count: i32,
        last_error: Option<&str>,
    ) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            UPDATE delayed_task_audits
            SET status = $2, retry_count = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(retry_count)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> CoordinatorResult<Option<DelayedTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, task_type, payload, execute_at, created_at, status, retry_count, max_retries, breaker_key, last_error
            FROM delayed_task_audits
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }
}
