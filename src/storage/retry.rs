//! Bounded retry wrapper for remote stores
//!
//! Only `StoreError::Transient` is retried. When the attempt ceiling is
//! reached the last error is surfaced as `StoreError::Unavailable`.

use super::{ObjectKey, RemoteStore};
use crate::error::{StoreError, StoreResult};
use std::time::Duration;

/// Retry schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per operation, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(64),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(StoreError::Transient(message)) if attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        what,
                        attempt,
                        max_attempts,
                        message,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(StoreError::Transient(message)) => {
                    tracing::error!("{} failed after {} attempts: {}", what, attempt, message);
                    return Err(StoreError::Unavailable {
                        attempts: attempt,
                        message,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Store wrapper applying a `RetryPolicy` to every operation
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: RemoteStore> RetryingStore<S> {
    /// Wrap a store
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: RemoteStore> RemoteStore for RetryingStore<S> {
    fn put(&self, key: &ObjectKey, body: &[u8]) -> StoreResult<()> {
        self.policy
            .run(&format!("put {}", key), || self.inner.put(key, body))
    }

    fn get(&self, key: &ObjectKey) -> StoreResult<Vec<u8>> {
        self.policy.run(&format!("get {}", key), || self.inner.get(key))
    }

    fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
        self.policy
            .run(&format!("exists {}", key), || self.inner.exists(key))
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectKey>> {
        self.policy
            .run(&format!("list {}", prefix), || self.inner.list(prefix))
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.policy
            .run(&format!("delete {}", key), || self.inner.delete(key))
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2,
        }
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            multiplier: 2,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(7), Duration::from_secs(64));
        assert_eq!(policy.delay_for(40), Duration::from_secs(64));
    }

    #[test]
    fn test_recovers_from_transient_failures() {
        let memory = Arc::new(MemoryStore::new());
        memory.fail_next(2);
        let store = RetryingStore::new(Arc::clone(&memory), fast_policy(3));

        store.put(&ObjectKey::new("k"), b"v").unwrap();
        assert_eq!(memory.get(&ObjectKey::new("k")).unwrap(), b"v");
    }

    #[test]
    fn test_exhaustion_becomes_unavailable() {
        let memory = Arc::new(MemoryStore::new());
        memory.set_offline(true);
        let store = RetryingStore::new(Arc::clone(&memory), fast_policy(3));

        let err = store.get(&ObjectKey::new("k")).unwrap_err();
        assert_eq!(
            err,
            StoreError::Unavailable {
                attempts: 3,
                message: "store offline".to_string()
            }
        );
        assert_eq!(memory.operation_count(), 3);
    }

    #[test]
    fn test_not_found_is_not_retried() {
        let memory = Arc::new(MemoryStore::new());
        let store = RetryingStore::new(Arc::clone(&memory), fast_policy(5));

        let err = store.get(&ObjectKey::new("missing")).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(memory.operation_count(), 1);
    }
}
