use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a delayed task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DelayedTaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RETRYING")]
    Retrying,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "PERMANENTLY_FAILED")]
    PermanentlyFailed,
    #[serde(rename = "CIRCUIT_BROKEN")]
    CircuitBroken,
}

impl DelayedTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelayedTaskStatus::Pending => "PENDING",
            DelayedTaskStatus::Retrying => "RETRYING",
            DelayedTaskStatus::Completed => "COMPLETED",
            DelayedTaskStatus::Failed => "FAILED",
            DelayedTaskStatus::PermanentlyFailed => "PERMANENTLY_FAILED",
            DelayedTaskStatus::CircuitBroken => "CIRCUIT_BROKEN",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            DelayedTaskStatus::Pending | DelayedTaskStatus::Retrying
        )
    }
}

impl sqlx::Type<sqlx::Postgres> for DelayedTaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for DelayedTaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "PENDING" => Ok(DelayedTaskStatus::Pending),
            "RETRYING" => Ok(DelayedTaskStatus::Retrying),
            "COMPLETED" => Ok(DelayedTaskStatus::Completed),
            "FAILED" => Ok(DelayedTaskStatus::Failed),
            "PERMANENTLY_FAILED" => Ok(DelayedTaskStatus::PermanentlyFailed),
            "CIRCUIT_BROKEN" => Ok(DelayedTaskStatus::CircuitBroken),
            _ => Err(format!("Invalid delayed task status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for DelayedTaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// Named priority lanes for immediate (non-delayed) dispatch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueuePriority {
    Express,
    Urgent,
    Normal,
}

impl QueuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePriority::Express => "express",
            QueuePriority::Urgent => "urgent",
            QueuePriority::Normal => "normal",
        }
    }

    /// Consumption order for the blocking pop across lanes
    pub fn all() -> [QueuePriority; 3] {
        [
            QueuePriority::Express,
            QueuePriority::Urgent,
            QueuePriority::Normal,
        ]
    }
}

/// A task scheduled for deferred execution.
///
/// The serialized form of this struct is the member stored in the due-time
/// sorted set; the score is `execute_at` as unix seconds. A retry never
/// rewrites the stored member in place: the worker removes the old entry
/// before executing and inserts a fresh one with the bumped retry count and
/// due-time, so two sweeps can never observe the same serialized entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedTask {
    pub id: String,
    pub task_type: String,
    pub payload: HashMap<String, serde_json::Value>,
    pub execute_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: DelayedTaskStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub breaker_key: String,
    pub last_error: Option<String>,
}

impl DelayedTask {
    pub fn new(
        task_type: impl Into<String>,
        payload: HashMap<String, serde_json::Value>,
        delay: Duration,
        max_retries: i32,
        breaker_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
            execute_at: now + delay,
            created_at: now,
            status: DelayedTaskStatus::Pending,
            retry_count: 0,
            max_retries,
            breaker_key: breaker_key.into(),
            last_error: None,
        }
    }

    /// Sorted-set score: due-time as unix seconds
    pub fn due_score(&self) -> i64 {
        self.execute_at.timestamp()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.execute_at <= now
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Quadratic back-off: `retry_count² × base`. Called after the retry
    /// count has been incremented, so consecutive retry due-times are
    /// strictly increasing.
    pub fn backoff_delay(&self, base: Duration) -> Duration {
        let factor = i64::from(self.retry_count).pow(2).max(1);
        base * (factor as i32)
    }

    pub fn reschedule_after_failure(&mut self, base: Duration, error: impl Into<String>) {
        self.retry_count += 1;
        self.status = DelayedTaskStatus::Retrying;
        self.last_error = Some(error.into());
        self.execute_at = Utc::now() + self.backoff_delay(base);
    }
}
