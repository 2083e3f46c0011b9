//! Resilience primitives for saga side effects: retry and deadline.
//!
//! The orchestrator never calls these separately. [`Resilience::run`] always
//! composes them as `deadline(retry(operation))`, so the deadline is the
//! budget for the whole sequence of attempts, backoff included:
//!
//! ```text
//! t=0   attempt 1 ── fails (transient)
//! t=1s  attempt 2 ── fails (transient)
//! t=3s  attempt 3 ── fails (transient)
//! t=5s  deadline ─── in-flight retry cancelled, TimeoutError
//! ```

pub mod retry;
pub mod timeout;

use std::future::Future;
use std::time::Duration;

pub use retry::{BACKOFF_MULTIPLIER, RetryPolicy, is_transient};
pub use timeout::{DeadlineError, TimeoutError, execute_with_deadline};

/// Default deadline for every saga side effect.
pub const DEFAULT_SIDE_EFFECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resilience {
    retry: RetryPolicy,
    timeout: Duration,
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), DEFAULT_SIDE_EFFECT_TIMEOUT)
    }
}

impl Resilience {
    pub fn new(retry: RetryPolicy, timeout: Duration) -> Self {
        Self { retry, timeout }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `operation` under the retry policy, bounded by the deadline.
    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, DeadlineError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        execute_with_deadline(
            self.retry.execute(operation_name, operation),
            self.timeout,
            operation_name,
        )
        .await
    }
}
