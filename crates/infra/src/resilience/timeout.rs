//! Deadline enforcement for async operations.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// The operation did not finish before its deadline and was cancelled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("operation '{operation}' timed out after {timeout:?}")]
pub struct TimeoutError {
    pub operation: String,
    pub timeout: Duration,
}

/// Outcome of a deadline-bounded operation that did not succeed.
///
/// Keeps deadline expiry distinct from the operation's own failures.
#[derive(Debug, Error)]
pub enum DeadlineError<E> {
    #[error(transparent)]
    Elapsed(TimeoutError),

    #[error(transparent)]
    Failed(E),
}

impl<E> DeadlineError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, DeadlineError::Elapsed(_))
    }

    pub fn into_failed(self) -> Option<E> {
        match self {
            DeadlineError::Failed(e) => Some(e),
            DeadlineError::Elapsed(_) => None,
        }
    }
}

/// Run `operation`, cancelling it if it is still pending after `timeout`.
///
/// Cancellation drops the in-flight future; nothing after its last `.await`
/// point runs.
pub async fn execute_with_deadline<T, E, Fut>(
    operation: Fut,
    timeout: Duration,
    operation_name: &str,
) -> Result<T, DeadlineError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result.map_err(DeadlineError::Failed),
        Err(_) => {
            warn!(operation = operation_name, timeout_ms = timeout.as_millis() as u64, "operation timed out");
            Err(DeadlineError::Elapsed(TimeoutError {
                operation: operation_name.to_string(),
                timeout,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[tokio::test(start_paused = true)]
    async fn slow_operation_is_cancelled() {
        let res: Result<(), DeadlineError<Boom>> = execute_with_deadline(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Duration::from_secs(5),
            "slow",
        )
        .await;

        match res {
            Err(DeadlineError::Elapsed(e)) => {
                assert_eq!(e.operation, "slow");
                assert_eq!(e.timeout, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn operation_errors_pass_through() {
        let res: Result<(), _> = execute_with_deadline(async { Err(Boom) }, Duration::from_secs(5), "fails").await;
        let err = res.unwrap_err();
        assert!(!err.is_elapsed());
        assert!(err.into_failed().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_operation_returns_its_value() {
        let res: Result<u8, DeadlineError<Boom>> =
            execute_with_deadline(async { Ok(3) }, Duration::from_millis(1), "fast").await;
        assert_eq!(res.unwrap(), 3);
    }
}
