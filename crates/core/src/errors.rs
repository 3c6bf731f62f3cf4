use thiserror::Error;

/// Coordination layer error types
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("lock not acquired: {key}")]
    LockNotAcquired { key: String },

    #[error("lock not held: {key}")]
    LockNotHeld { key: String },

    #[error("circuit breaker open: {key}")]
    CircuitOpen { key: String },

    #[error("scheduled task not found: {name}")]
    TaskNotFound { name: String },

    #[error("invalid cron expression: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task execution error: {0}")]
    TaskExecution(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(e: serde_json::Error) -> Self {
        CoordinatorError::Serialization(e.to_string())
    }
}

impl CoordinatorError {
    /// Contended-lock and open-breaker errors are expected during normal
    /// multi-replica operation and should be logged informationally, not
    /// escalated.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            CoordinatorError::LockNotAcquired { .. }
                | CoordinatorError::LockNotHeld { .. }
                | CoordinatorError::CircuitOpen { .. }
        )
    }
}

/// Failure classification reported by task handlers.
///
/// Handlers signal `Permanent` when retrying can never succeed (for example
/// the referenced letter or user row has been deleted). Everything else is
/// `Transient` and goes through the back-off path up to the configured
/// retry budget.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl TaskError {
    pub fn permanent(msg: impl Into<String>) -> Self {
        TaskError::Permanent(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        TaskError::Transient(msg.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, TaskError::Permanent(_))
    }

    pub fn message(&self) -> &str {
        match self {
            TaskError::Permanent(msg) | TaskError::Transient(msg) => msg,
        }
    }
}
