use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::task_execution::ExecutionStatus;

/// A named, cron-triggered unit of recurring work.
///
/// One row per task, shared by every backend replica. Which replica actually
/// runs a given tick is decided by the distributed lock, not by this record;
/// the row only carries configuration and the rolling run/failure counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    pub cron_expression: String,
    pub timeout_seconds: i32,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<ExecutionStatus>,
    pub last_error: Option<String>,
    pub run_count: i64,
    pub failure_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // assigned by the database
            name: name.into(),
            cron_expression: cron_expression.into(),
            timeout_seconds: 300,
            is_active: true,
            last_run_at: None,
            next_run_at: None,
            last_status: None,
            last_error: None,
            run_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: i32) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Lock TTL for one guarded execution. The lock is extended on a ticker
    /// while the job runs, so this only needs to cover the extension
    /// interval with comfortable margin; 30 seconds is the floor.
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs((self.timeout_seconds.max(30)) as u64)
    }

    pub fn lock_key(&self) -> String {
        format!("scheduler:task:{}", self.name)
    }
}

/// The result of one lock-guarded execution attempt, applied to the task's
/// persisted counters after the lock is released.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub ran_at: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ExecutionStatus::Completed)
    }
}
