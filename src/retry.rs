//! Bounded exponential backoff for idempotent writes

use crate::error::StoreError;
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for transient [`StoreError`]s
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay_ms: u64,
    /// Upper bound for any single delay (before jitter)
    pub max_delay_ms: u64,
    /// Relative jitter, 0.5 means ±50%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits, for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let nominal = (self.base_delay_ms as f64 * 2f64.powi(exponent)).min(self.max_delay_ms as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };

        Duration::from_millis((nominal * factor).round() as u64)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Non-transient errors are returned as-is on the first occurrence.
    /// Exhausting the attempts yields [`StoreError::RetryExhausted`].
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(StoreError::RetryExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    })
                }
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation = %operation,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObjectStoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> StoreError {
        StoreError::Backend {
            key: "events/T1".to_string(),
            source: ObjectStoreError::Io("reset".to_string()),
        }
    }

    #[test]
    fn test_delay_growth_without_jitter() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(5_000));
    }

    #[test]
    fn test_delay_jitter_bounds() {
        let policy = RetryPolicy::default();

        for _ in 0..200 {
            let delay = policy.delay_for_attempt(1).as_millis();
            assert!((100..=300).contains(&delay), "delay {} out of bounds", delay);
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result = policy
            .run("put", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result: Result<(), _> = policy
            .run("put", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(matches!(result, Err(StoreError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result: Result<(), _> = policy
            .run("put", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Corrupt {
                    key: "events/T1".to_string(),
                    reason: "bad".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
