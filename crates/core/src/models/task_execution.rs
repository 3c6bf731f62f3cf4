use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a single execution attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for ExecutionStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ExecutionStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "RUNNING" => Ok(ExecutionStatus::Running),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            _ => Err(format!("Invalid execution status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ExecutionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// One execution attempt of a scheduled task.
///
/// A row is created when the per-task lock is acquired and the job starts,
/// then updated in place exactly once when the job finishes. The history is
/// append-only after that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: String,
    pub task_id: i64,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub worker_id: String,
    pub process_id: i32,
    pub result: Option<String>,
    pub error_message: Option<String>,
}

impl TaskExecution {
    pub fn begin(task_id: i64, worker_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            worker_id: worker_id.into(),
            process_id: std::process::id() as i32,
            result: None,
            error_message: None,
        }
    }

    pub fn complete(&mut self, result: Option<String>) {
        self.finish(ExecutionStatus::Completed);
        self.result = result;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(ExecutionStatus::Failed);
        self.error_message = Some(error.into());
    }

    fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, ExecutionStatus::Running)
    }
}
