//! Exponential backoff with jitter for fallible async units of work.
//!
//! Every call to [`RetryPolicy::run`] (or [`Retrying::call`]) keeps its own
//! attempt counter, so no retry budget leaks between units.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Backoff parameters.
///
/// The delay before retry `n` (0-indexed) is
/// `min(base_delay * 2^n + jitter, max_delay)` with jitter drawn uniformly
/// from `0..max_jitter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 16_000,
            max_jitter_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that runs the unit exactly once.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to sleep after the failed attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exponential = self.base_delay_ms.saturating_mul(factor);
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            (rand::random::<f64>() * self.max_jitter_ms as f64) as u64
        };
        Duration::from_millis(exponential.saturating_add(jitter).min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// Failures before the last attempt are logged at warn level and retried
    /// after [`delay_for`](Self::delay_for). The last failure is logged at error
    /// level and returned.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= attempts => {
                    error!(
                        unit = label,
                        attempts,
                        error = %err,
                        "Unit of work failed, retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        unit = label,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Unit of work failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Wrap `op` so every [`Retrying::call`] applies this policy.
    pub fn wrap<F>(self, label: impl Into<String>, op: F) -> Retrying<F> {
        Retrying {
            policy: self,
            label: label.into(),
            op,
        }
    }
}

/// A fallible async operation bundled with its retry policy.
pub struct Retrying<F> {
    policy: RetryPolicy,
    label: String,
    op: F,
}

impl<F> Retrying<F> {
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke the wrapped operation under the policy.
    pub async fn call<T, E, Fut>(&mut self) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.policy.run(&self.label, &mut self.op).await
    }
}

/// Shorthand for `policy.wrap(label, op)`.
pub fn with_retry<F>(policy: RetryPolicy, label: impl Into<String>, op: F) -> Retrying<F> {
    policy.wrap(label, op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 4,
            max_jitter_ms: 0,
        }
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        let policy = RetryPolicy {
            max_jitter_ms: 0,
            ..Default::default()
        };

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(200), Duration::from_secs(16));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(2_000));
            assert!(delay < Duration::from_millis(3_000));
        }
        assert_eq!(policy.delay_for(10), Duration::from_millis(16_000));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, String> = fast_policy(5)
            .run("flaky", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("boom".to_string())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_propagates_last_error_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = fast_policy(3)
            .run("always-fails", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {}", n))
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let _: Result<(), String> = fast_policy(0)
            .run("once", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("no".to_string())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrapped_calls_have_independent_budgets() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut wrapped = with_retry(fast_policy(2), "independent", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("down".to_string())
            }
        });

        assert!(wrapped.call().await.is_err());
        assert!(wrapped.call().await.is_err());
        // Each call gets the full two attempts.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(wrapped.policy().max_attempts, 2);
    }
}
