pub mod database;
pub mod distributed_lock;
pub mod in_memory;
pub mod redis_manager;
pub mod redis_queue_store;

pub use database::postgres::{
    PostgresDelayedTaskAuditRepository, PostgresScheduledTaskRepository,
    PostgresTaskExecutionRepository,
};
pub use distributed_lock::RedisLockManager;
pub use in_memory::{InMemoryLockService, InMemoryQueueStore};
pub use redis_manager::RedisManager;
pub use redis_queue_store::RedisQueueStore;
