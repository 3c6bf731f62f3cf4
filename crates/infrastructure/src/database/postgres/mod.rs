mod delayed_task_audit_repository;
mod scheduled_task_repository;
mod task_execution_repository;

pub use delayed_task_audit_repository::PostgresDelayedTaskAuditRepository;
pub use scheduled_task_repository::PostgresScheduledTaskRepository;
pub use task_execution_repository::PostgresTaskExecutionRepository;
