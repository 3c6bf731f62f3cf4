use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::CoordinatorError;
use crate::CoordinatorResult;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Calls are blocked
    Open,
    /// One trial call is allowed to probe recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long an open circuit stays open before allowing a trial
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }
}

/// Per-key circuit breakers guarding delay-queue task classes.
///
/// Keys group tasks by logical class and resource (convention:
/// `<task-type>:<primary-id>[:<secondary-id>]`) so one poison resource does
/// not quarantine unrelated tasks of the same type. State is per-process
/// only; cross-process coordination happens through the store-backed lock
/// and queue, never through breaker state. The registry is an injected
/// component so tests and embedded deployments can hold independent
/// instances.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    entries: RwLock<HashMap<String, BreakerEntry>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether a call for `key` may proceed.
    ///
    /// An open circuit whose timeout has elapsed transitions to half-open
    /// and lets the call through as the trial.
    pub async fn allow(&self, key: &str) -> CoordinatorResult<()> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(()),
                Some(entry) => match entry.state {
                    BreakerState::Closed | BreakerState::HalfOpen => return Ok(()),
                    BreakerState::Open => {
                        let elapsed = entry
                            .last_failure
                            .map(|t| t.elapsed())
                            .unwrap_or(Duration::MAX);
                        if elapsed < self.config.open_timeout {
                            return Err(CoordinatorError::CircuitOpen {
                                key: key.to_string(),
                            });
                        }
                    }
                },
            }
        }

        // Open and timed out: promote to half-open for one trial.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            if entry.state == BreakerState::Open {
                entry.state = BreakerState::HalfOpen;
            }
        }
        Ok(())
    }

    /// Record a successful call. A half-open trial success closes the
    /// circuit and resets its failure count; in the closed state the
    /// failure count decays by one so stale failures age out.
    pub async fn record_success(&self, key: &str) {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(BreakerEntry::new);
        match entry.state {
            BreakerState::HalfOpen => {
                entry.state = BreakerState::Closed;
                entry.failure_count = 0;
                entry.last_failure = None;
            }
            BreakerState::Closed => {
                entry.failure_count = entry.failure_count.saturating_sub(1);
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call. Reaching the threshold opens the circuit; any
    /// failure during the half-open trial reopens it immediately.
    pub async fn record_failure(&self, key: &str) {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(BreakerEntry::new);
        entry.failure_count += 1;
        entry.last_failure = Some(Instant::now());
        match entry.state {
            BreakerState::Closed => {
                if entry.failure_count >= self.config.failure_threshold {
                    entry.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                entry.state = BreakerState::Open;
            }
            BreakerState::Open => {}
        }
    }

    pub async fn state(&self, key: &str) -> BreakerState {
        self.entries
            .read()
            .await
            .get(key)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }

    pub async fn failure_count(&self, key: &str) -> u32 {
        self.entries
            .read()
            .await
            .get(key)
            .map(|e| e.failure_count)
            .unwrap_or(0)
    }

    pub async fn reset(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Snapshot of every tracked key, for diagnostics
    pub async fn snapshot(&self) -> HashMap<String, BreakerState> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.state))
            .collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, timeout: Duration) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            open_timeout: timeout,
        })
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let breakers = registry(5, Duration::from_secs(600));
        let key = "ai_reply:U1:P1";

        for _ in 0..4 {
            breakers.record_failure(key).await;
            assert!(breakers.allow(key).await.is_ok());
        }
        breakers.record_failure(key).await;
        assert_eq!(breakers.state(key).await, BreakerState::Open);
        assert!(matches!(
            breakers.allow(key).await,
            Err(CoordinatorError::CircuitOpen { .. })
        ));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let breakers = registry(2, Duration::from_secs(600));
        breakers.record_failure("ai_reply:U1:P1").await;
        breakers.record_failure("ai_reply:U1:P1").await;

        assert!(breakers.allow("ai_reply:U2:P1").await.is_ok());
        assert!(breakers.allow("ai_reply:U1:P1").await.is_err());
    }

    #[tokio::test]
    async fn test_half_open_trial_closes_on_success() {
        let breakers = registry(2, Duration::from_millis(50));
        let key = "future_letter:L9";

        breakers.record_failure(key).await;
        breakers.record_failure(key).await;
        assert_eq!(breakers.state(key).await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        // Timed out: the next check is allowed as the half-open trial.
        assert!(breakers.allow(key).await.is_ok());
        assert_eq!(breakers.state(key).await, BreakerState::HalfOpen);

        breakers.record_success(key).await;
        assert_eq!(breakers.state(key).await, BreakerState::Closed);
        assert_eq!(breakers.failure_count(key).await, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breakers = registry(1, Duration::from_millis(50));
        let key = "notification:U3";

        breakers.record_failure(key).await;
        assert_eq!(breakers.state(key).await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(breakers.allow(key).await.is_ok());

        breakers.record_failure(key).await;
        assert_eq!(breakers.state(key).await, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_closed_success_decays_failures() {
        let breakers = registry(3, Duration::from_secs(600));
        let key = "ai_reply:U1:P1";

        breakers.record_failure(key).await;
        breakers.record_failure(key).await;
        breakers.record_success(key).await;
        breakers.record_failure(key).await;

        // 2 failures - 1 decay + 1 failure = 2, still under threshold
        assert_eq!(breakers.state(key).await, BreakerState::Closed);
        assert_eq!(breakers.failure_count(key).await, 2);
    }
}
