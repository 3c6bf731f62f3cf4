use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ExistenceCheck, Script, SetExpiry, SetOptions};
use tracing::{debug, warn};

use coordinator_core::errors::CoordinatorError;
use coordinator_core::traits::LockService;
use coordinator_core::CoordinatorResult;

use crate::redis_manager::RedisManager;

/// Atomic check-and-delete: only the holder of the stored token may delete.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Atomic check-and-expire: only the holder may push the TTL out.
const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Redis-backed [`LockService`].
///
/// Acquisition is a single `SET key token NX PX ttl`; release and extension
/// run Lua scripts so the token comparison and the mutation are one atomic
/// step on the server.
pub struct RedisLockManager {
    connection: ConnectionManager,
    key_prefix: String,
    release_script: Script,
    extend_script: Script,
}

impl RedisLockManager {
    pub fn new(manager: &RedisManager) -> Self {
        Self {
            connection: manager.connection(),
            key_prefix: manager.key_prefix().to_string(),
            release_script: Script::new(RELEASE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn new_token() -> String {
        format!("{:032x}", rand::random::<u128>())
    }
}

#[async_trait]
impl LockService for RedisLockManager {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> CoordinatorResult<Option<String>> {
        let full_key = self.full_key(key);
        let token = Self::new_token();
        let mut conn = self.connection.clone();

        let options = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::PX(ttl.as_millis() as u64));

        let reply: Option<String> = conn
            .set_options(&full_key, &token, options)
            .await
            .map_err(|e| CoordinatorError::Redis(format!("lock acquire failed: {e}")))?;

        match reply {
            Some(_) => {
                debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "lock acquired");
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    async fn release(&self, key: &str, token: &str) -> CoordinatorResult<()> {
        let full_key = self.full_key(key);
        let mut conn = self.connection.clone();

        let deleted: i64 = self
            .release_script
            .key(&full_key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoordinatorError::Redis(format!("lock release failed: {e}")))?;

        if deleted == 0 {
            return Err(CoordinatorError::LockNotHeld {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> CoordinatorResult<()> {
        let full_key = self.full_key(key);
        let mut conn = self.connection.clone();

        let extended: i64 = self
            .extend_script
            .key(&full_key)
            .arg(token)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoordinatorError::Redis(format!("lock extend failed: {e}")))?;

        if extended == 0 {
            return Err(CoordinatorError::LockNotHeld {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn is_held(&self, key: &str, token: &str) -> CoordinatorResult<bool> {
        let holder = self.get_holder(key).await?;
        Ok(holder.as_deref() == Some(token))
    }

    async fn get_holder(&self, key: &str) -> CoordinatorResult<Option<String>> {
        let full_key = self.full_key(key);
        let mut conn = self.connection.clone();
        let holder: Option<String> = conn
            .get(&full_key)
            .await
            .map_err(|e| CoordinatorError::Redis(format!("lock holder read failed: {e}")))?;
        Ok(holder)
    }

    async fn force_release(&self, key: &str) -> CoordinatorResult<bool> {
        let full_key = self.full_key(key);
        let mut conn = self.connection.clone();
        let deleted: i64 = conn
            .del(&full_key)
            .await
            .map_err(|e| CoordinatorError::Redis(format!("lock force release failed: {e}")))?;
        if deleted > 0 {
            warn!(key = %key, "lock force released");
        }
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_fixed_width() {
        let a = RedisLockManager::new_token();
        let b = RedisLockManager::new_token();
        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 32);
        assert_ne!(a, b);
    }
}
