use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use coordinator_core::errors::CoordinatorError;
use coordinator_core::models::{DelayedTask, QueuePriority};
use coordinator_core::traits::{DelayQueueStore, LockService};
use coordinator_core::CoordinatorResult;

/// Process-local [`LockService`] for tests and single-node development.
///
/// Mirrors the store-backed semantics, including TTL expiry and token
/// checks, so exclusion logic can be exercised without Redis.
#[derive(Default)]
pub struct InMemoryLockService {
    locks: Mutex<HashMap<String, LockEntry>>,
}

struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_token(locks: &mut HashMap<String, LockEntry>, key: &str) -> Option<String> {
        match locks.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.token.clone()),
            Some(_) => {
                locks.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> CoordinatorResult<Option<String>> {
        let mut locks = self.locks.lock().unwrap();
        if Self::live_token(&mut locks, key).is_some() {
            return Ok(None);
        }
        let token = format!("{:032x}", rand::random::<u128>());
        locks.insert(
            key.to_string(),
            LockEntry {
                token: token.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &str) -> CoordinatorResult<()> {
        let mut locks = self.locks.lock().unwrap();
        match Self::live_token(&mut locks, key) {
            Some(held) if held == token => {
                locks.remove(key);
                Ok(())
            }
            _ => Err(CoordinatorError::LockNotHeld {
                key: key.to_string(),
            }),
        }
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> CoordinatorResult<()> {
        let mut locks = self.locks.lock().unwrap();
        match Self::live_token(&mut locks, key) {
            Some(held) if held == token => {
                if let Some(entry) = locks.get_mut(key) {
                    entry.expires_at = Instant::now() + ttl;
                }
                Ok(())
            }
            _ => Err(CoordinatorError::LockNotHeld {
                key: key.to_string(),
            }),
        }
    }

    async fn is_held(&self, key: &str, token: &str) -> CoordinatorResult<bool> {
        let mut locks = self.locks.lock().unwrap();
        Ok(Self::live_token(&mut locks, key).as_deref() == Some(token))
    }

    async fn get_holder(&self, key: &str) -> CoordinatorResult<Option<String>> {
        let mut locks = self.locks.lock().unwrap();
        Ok(Self::live_token(&mut locks, key))
    }

    async fn force_release(&self, key: &str) -> CoordinatorResult<bool> {
        let mut locks = self.locks.lock().unwrap();
        Ok(locks.remove(key).is_some())
    }
}

/// Process-local [`DelayQueueStore`], ordered the same way the sorted-set
/// backend orders members.
#[derive(Default)]
pub struct InMemoryQueueStore {
    delayed: Mutex<Vec<(i64, String)>>,
    lanes: Mutex<HashMap<&'static str, VecDeque<String>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw (score, member) snapshot for test assertions
    pub fn entries(&self) -> Vec<(i64, String)> {
        self.delayed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DelayQueueStore for InMemoryQueueStore {
    async fn push(&self, task: &DelayedTask) -> CoordinatorResult<()> {
        let member = serde_json::to_string(task)?;
        let mut delayed = self.delayed.lock().unwrap();
        delayed.push((task.due_score(), member));
        delayed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(())
    }

    async fn due_tasks(&self, now: DateTime<Utc>, limit: usize) -> CoordinatorResult<Vec<String>> {
        let delayed = self.delayed.lock().unwrap();
        Ok(delayed
            .iter()
            .filter(|(score, _)| *score <= now.timestamp())
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn claim(&self, member: &str) -> CoordinatorResult<bool> {
        let mut delayed = self.delayed.lock().unwrap();
        let before = delayed.len();
        delayed.retain(|(_, m)| m != member);
        Ok(delayed.len() < before)
    }

    async fn pending_count(&self) -> CoordinatorResult<u64> {
        Ok(self.delayed.lock().unwrap().len() as u64)
    }

    async fn due_count(&self, now: DateTime<Utc>) -> CoordinatorResult<u64> {
        let delayed = self.delayed.lock().unwrap();
        Ok(delayed
            .iter()
            .filter(|(score, _)| *score <= now.timestamp())
            .count() as u64)
    }

    async fn push_priority(&self, priority: QueuePriority, payload: &str) -> CoordinatorResult<()> {
        let mut lanes = self.lanes.lock().unwrap();
        lanes
            .entry(priority.as_str())
            .or_default()
            .push_back(payload.to_string());
        Ok(())
    }

    async fn pop_priority(
        &self,
        timeout: Duration,
    ) -> CoordinatorResult<Option<(QueuePriority, String)>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut lanes = self.lanes.lock().unwrap();
                for priority in QueuePriority::all() {
                    if let Some(lane) = lanes.get_mut(priority.as_str()) {
                        if let Some(payload) = lane.pop_front() {
                            return Ok(Some((priority, payload)));
                        }
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
