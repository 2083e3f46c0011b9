//! Bounded exponential-backoff retry for transient failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::timeout::TimeoutError;

/// Each retry waits twice as long as the previous one.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Retry policy for saga side effects.
///
/// `max_attempts` counts *retries*: with the default of 3 an operation runs at
/// most four times, waiting 1s, 2s and 4s in between. No jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(BACKOFF_MULTIPLIER.saturating_pow(exp))
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// Non-transient errors are returned on first occurrence. When retries are
    /// exhausted the last error is returned unchanged.
    pub async fn execute<T, E, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let mut retry = 0u32;
        loop {
            debug!(operation = operation_name, attempt = retry + 1, "executing operation");

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !is_transient(&err) {
                error!(operation = operation_name, error = %err, "operation failed with non-retryable error");
                return Err(err);
            }
            if retry >= self.max_attempts {
                error!(
                    operation = operation_name,
                    attempts = retry + 1,
                    error = %err,
                    "operation failed after exhausting retries"
                );
                return Err(err);
            }

            retry += 1;
            let delay = self.delay_for(retry);
            warn!(
                operation = operation_name,
                retry,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Whether `err` (or anything in its `source()` chain) looks transient.
///
/// Transient: deadline exceeded, connection refused/reset/aborted, interrupted
/// or cancelled work, or a message mentioning "connection" or "timeout".
pub fn is_transient(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if is_transient_kind(e) {
            return true;
        }
        let msg = e.to_string().to_lowercase();
        if msg.contains("connection") || msg.contains("timeout") {
            return true;
        }
        current = e.source();
    }
    false
}

fn is_transient_kind(e: &(dyn std::error::Error + 'static)) -> bool {
    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        use std::io::ErrorKind;
        return matches!(
            io.kind(),
            ErrorKind::TimedOut
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::Interrupted
        );
    }
    if let Some(join) = e.downcast_ref::<tokio::task::JoinError>() {
        return join.is_cancelled();
    }
    e.is::<tokio::time::error::Elapsed>() || e.is::<TimeoutError>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("connection refused by peer")]
        Transient,
        #[error("file name is empty")]
        Permanent,
        #[error("publish failed")]
        Wrapped(#[source] std::io::Error),
    }

    #[test]
    fn delays_double_from_the_base() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn classifies_by_kind_message_and_source() {
        assert!(is_transient(&TestError::Transient));
        assert!(!is_transient(&TestError::Permanent));
        assert!(is_transient(&TestError::Wrapped(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset
        ))));
        assert!(!is_transient(&TestError::Wrapped(std::io::Error::from(
            std::io::ErrorKind::NotFound
        ))));
        assert!(is_transient(&std::io::Error::other("Request Timeout")));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_run_max_attempts_plus_one_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();

        let c = calls.clone();
        let res: Result<(), TestError> = policy
            .execute("always_transient", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                }
            })
            .await;

        assert!(matches!(res, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let res: Result<(), TestError> = RetryPolicy::default()
            .execute("permanent", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Permanent)
                }
            })
            .await;

        assert!(matches!(res, Err(TestError::Permanent)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_a_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let res: Result<u32, TestError> = RetryPolicy::default()
            .execute("flaky", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError::Transient)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_one_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let _ = RetryPolicy::no_retry()
            .execute("once", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Transient)
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
