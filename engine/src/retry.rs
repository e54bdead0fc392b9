//! # Bounded Exponential Backoff
//!
//! Every external call (price fetch, quote, instruction build, RPC read)
//! goes through [`retry`]. Only [`EngineError::is_transient`] failures are
//! retried; a ledger rejection or a malformed response is returned on the
//! first attempt.
//!
//! Delays are `base`, `base × multiplier`, `base × multiplier²`, … and the
//! number of attempts is capped. There is no unbounded mode.

use std::future::Future;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Retry schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries. Handy in tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to sleep after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Runs `op` until it succeeds, fails permanently, or exhausts the policy.
///
/// `label` is only used for logging.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(operation = label, attempts = attempt, error = %err, "retries exhausted");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double_from_one_second() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: EngineResult<()> = retry(&RetryPolicy::default(), "quote", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::transient("quote", "timeout")) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff between the three attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry(&RetryPolicy::default(), "price", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(EngineError::transient("price", "reset"))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = retry(&RetryPolicy::default(), "submit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(EngineError::LedgerRejection {
                    message: "stale share price".into(),
                    logs: vec![],
                })
            }
        })
        .await;

        assert!(matches!(result, Err(EngineError::LedgerRejection { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
