use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::CoordinatorError;
use crate::CoordinatorResult;

/// Store-backed mutual exclusion for a named resource.
///
/// A lock is a key whose stored value is an opaque ownership token; release
/// and extension verify the token atomically in the store, so a caller that
/// lost its lock (TTL expiry, takeover) cannot disturb the next owner.
/// `is_held` and `get_holder` are best-effort diagnostic reads and must
/// never gate a subsequent mutation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockService: Send + Sync {
    /// Single `SET key token NX` attempt; `None` means the key is held.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> CoordinatorResult<Option<String>>;

    /// Atomic check-and-delete; `LockNotHeld` if the token does not match.
    async fn release(&self, key: &str, token: &str) -> CoordinatorResult<()>;

    /// Atomic check-and-expire; `LockNotHeld` if the token does not match.
    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> CoordinatorResult<()>;

    /// Diagnostic only: does the stored value still equal `token`?
    async fn is_held(&self, key: &str, token: &str) -> CoordinatorResult<bool>;

    /// Diagnostic only: the current stored token, if any.
    async fn get_holder(&self, key: &str) -> CoordinatorResult<Option<String>>;

    /// Unconditional delete, bypassing the token check. Manual recovery
    /// escape hatch for locks orphaned by a crashed process.
    async fn force_release(&self, key: &str) -> CoordinatorResult<bool>;
}

/// Retry policy for contended acquisition
#[derive(Debug, Clone)]
pub struct LockRetryConfig {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for LockRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl LockRetryConfig {
    /// Single attempt, no waiting. Used by the scheduler, where a held lock
    /// means another replica owns the tick.
    pub fn fail_fast() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Acquire with bounded retries, returning the ownership token.
pub async fn acquire(
    lock: &dyn LockService,
    key: &str,
    ttl: Duration,
    retry: &LockRetryConfig,
) -> CoordinatorResult<String> {
    for attempt in 0..retry.attempts.max(1) {
        if let Some(token) = lock.try_acquire(key, ttl).await? {
            return Ok(token);
        }
        if attempt + 1 < retry.attempts {
            tokio::time::sleep(retry.delay).await;
        }
    }
    Err(CoordinatorError::LockNotAcquired {
        key: key.to_string(),
    })
}

/// Keep trying until the lock is acquired or `timeout` elapses, for callers
/// that want blocking semantics instead of fail-fast.
pub async fn wait_for_lock(
    lock: &dyn LockService,
    key: &str,
    ttl: Duration,
    timeout: Duration,
    poll_delay: Duration,
) -> CoordinatorResult<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(token) = lock.try_acquire(key, ttl).await? {
            return Ok(token);
        }
        if tokio::time::Instant::now() + poll_delay > deadline {
            return Err(CoordinatorError::LockNotAcquired {
                key: key.to_string(),
            });
        }
        tokio::time::sleep(poll_delay).await;
    }
}

/// Acquire, run `f`, always release. The lock is released before the
/// function's error (if any) propagates.
pub async fn run_with_lock<F, Fut, T>(
    lock: &dyn LockService,
    key: &str,
    ttl: Duration,
    retry: &LockRetryConfig,
    f: F,
) -> CoordinatorResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = CoordinatorResult<T>>,
{
    let token = acquire(lock, key, ttl, retry).await?;
    let result = f().await;
    release_quietly(lock, key, &token).await;
    result
}

/// Run `f` while a background ticker re-extends an already-held lock.
///
/// If an extension fails the lock is gone (store restart or TTL elapsed),
/// so no exclusion guarantee remains: the function's future is dropped at
/// the next await point and `LockNotHeld` is returned. The final release is
/// attempted in every case.
pub async fn extend_while_running<F, Fut, T>(
    lock: Arc<dyn LockService>,
    key: &str,
    token: &str,
    ttl: Duration,
    extend_every: Duration,
    f: F,
) -> CoordinatorResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = CoordinatorResult<T>>,
{
    let (lost_tx, mut lost_rx) = oneshot::channel::<CoordinatorError>();

    let extender = {
        let lock = Arc::clone(&lock);
        let key = key.to_string();
        let token = token.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(extend_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                match lock.extend(&key, &token, ttl).await {
                    Ok(()) => debug!(key = %key, "lock extended"),
                    Err(e) => {
                        warn!(key = %key, error = %e, "lock extension failed, cancelling task");
                        let _ = lost_tx.send(e);
                        return;
                    }
                }
            }
        })
    };

    let fut = f();
    tokio::pin!(fut);

    let result = tokio::select! {
        res = &mut fut => res,
        lost = &mut lost_rx => {
            match lost {
                Ok(e) => Err(e),
                Err(_) => Err(CoordinatorError::LockNotHeld { key: key.to_string() }),
            }
        }
    };

    extender.abort();
    release_quietly(&*lock, key, token).await;
    result
}

/// Acquire + extend-while-running + release, for long tasks whose runtime
/// may exceed any reasonable fixed TTL.
pub async fn run_with_lock_extension<F, Fut, T>(
    lock: Arc<dyn LockService>,
    key: &str,
    ttl: Duration,
    extend_every: Duration,
    retry: &LockRetryConfig,
    f: F,
) -> CoordinatorResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = CoordinatorResult<T>>,
{
    let token = acquire(&*lock, key, ttl, retry).await?;
    extend_while_running(lock, key, &token, ttl, extend_every, f).await
}

/// Release failures mean the lock already expired or was taken over; the
/// TTL self-heals the key, so this is logged and never escalated.
async fn release_quietly(lock: &dyn LockService, key: &str, token: &str) {
    match lock.release(key, token).await {
        Ok(()) => debug!(key = %key, "lock released"),
        Err(CoordinatorError::LockNotHeld { .. }) => {
            debug!(key = %key, "lock already expired at release")
        }
        Err(e) => warn!(key = %key, error = %e, "lock release failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_retries_until_success() {
        let mut mock = MockLockService::new();
        mock.expect_try_acquire()
            .times(2)
            .returning(|_, _| Ok(None));
        mock.expect_try_acquire()
            .times(1)
            .returning(|_, _| Ok(Some("tok".to_string())));

        let retry = LockRetryConfig {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let token = acquire(&mock, "scheduler:task:x", Duration::from_secs(30), &retry)
            .await
            .unwrap();
        assert_eq!(token, "tok");
    }

    #[tokio::test]
    async fn test_fail_fast_gives_up_after_one_attempt() {
        let mut mock = MockLockService::new();
        mock.expect_try_acquire()
            .times(1)
            .returning(|_, _| Ok(None));

        let result = acquire(
            &mock,
            "scheduler:task:x",
            Duration::from_secs(30),
            &LockRetryConfig::fail_fast(),
        )
        .await;
        assert!(matches!(
            result,
            Err(CoordinatorError::LockNotAcquired { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_for_lock_blocks_until_released() {
        let mut mock = MockLockService::new();
        mock.expect_try_acquire()
            .times(2)
            .returning(|_, _| Ok(None));
        mock.expect_try_acquire()
            .times(1)
            .returning(|_, _| Ok(Some("tok".to_string())));

        let token = wait_for_lock(
            &mock,
            "scheduler:task:x",
            Duration::from_secs(30),
            Duration::from_millis(200),
            Duration::from_millis(5),
        )
        .await
        .unwrap();
        assert_eq!(token, "tok");
    }

    #[tokio::test]
    async fn test_wait_for_lock_gives_up_at_deadline() {
        let mut mock = MockLockService::new();
        mock.expect_try_acquire().returning(|_, _| Ok(None));

        let result = wait_for_lock(
            &mock,
            "scheduler:task:x",
            Duration::from_secs(30),
            Duration::from_millis(20),
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(
            result,
            Err(CoordinatorError::LockNotAcquired { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_with_lock_releases_on_error() {
        let mut mock = MockLockService::new();
        mock.expect_try_acquire()
            .times(1)
            .returning(|_, _| Ok(Some("tok".to_string())));
        mock.expect_release()
            .times(1)
            .withf(|key, token| key == "scheduler:task:x" && token == "tok")
            .returning(|_, _| Ok(()));

        let result: CoordinatorResult<()> = run_with_lock(
            &mock,
            "scheduler:task:x",
            Duration::from_secs(30),
            &LockRetryConfig::fail_fast(),
            || async { Err(CoordinatorError::TaskExecution("boom".to_string())) },
        )
        .await;
        assert!(matches!(result, Err(CoordinatorError::TaskExecution(_))));
    }

    #[tokio::test]
    async fn test_extension_failure_cancels_the_task() {
        let mut mock = MockLockService::new();
        mock.expect_extend().returning(|key, _, _| {
            Err(CoordinatorError::LockNotHeld {
                key: key.to_string(),
            })
        });
        // Final release still attempted even though the lock is gone.
        mock.expect_release().times(1).returning(|key, _| {
            Err(CoordinatorError::LockNotHeld {
                key: key.to_string(),
            })
        });

        let lock: Arc<dyn LockService> = Arc::new(mock);
        let result: CoordinatorResult<()> = extend_while_running(
            lock,
            "scheduler:task:x",
            "tok",
            Duration::from_secs(30),
            Duration::from_millis(10),
            || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(CoordinatorError::LockNotHeld { .. })));
    }

    #[tokio::test]
    async fn test_extension_keeps_running_task_alive() {
        let mut mock = MockLockService::new();
        mock.expect_extend().returning(|_, _, _| Ok(()));
        mock.expect_release().times(1).returning(|_, _| Ok(()));

        let lock: Arc<dyn LockService> = Arc::new(mock);
        let result = extend_while_running(
            lock,
            "scheduler:task:x",
            "tok",
            Duration::from_secs(30),
            Duration::from_millis(5),
            || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok("done".to_string())
            },
        )
        .await
        .unwrap();
        assert_eq!(result, "done");
    }
}
