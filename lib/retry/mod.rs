//! Exponential-backoff retry for transient failures, decoupled from any particular
//! operation or transport. See [`crate::model::RetryPolicy`] for the tunable knobs.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::model::RetryPolicy;
use crate::{ReplicoreError, ReplicoreResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Classifies whether a failure is worth retrying.
pub trait Retryable {
    /// Returns `true` if the operation that produced this error should be retried.
    fn is_retryable(&self) -> bool;
}

impl Retryable for ReplicoreError {
    fn is_retryable(&self) -> bool {
        match self {
            ReplicoreError::Cancelled => false,
            ReplicoreError::HttpRequest(e) => e.is_timeout() || e.is_connect() || status_is_retryable(e.status()),
            ReplicoreError::HttpMiddleware(_) => true,
            ReplicoreError::UnexpectedStatus { status, .. } => {
                status_code_is_retryable(*status)
            }
            ReplicoreError::Io(_) => true,
            _ => false,
        }
    }
}

fn status_is_retryable(status: Option<reqwest::StatusCode>) -> bool {
    status.map(|s| status_code_is_retryable(s.as_u16())).unwrap_or(false)
}

fn status_code_is_retryable(code: u16) -> bool {
    matches!(code, 429 | 500 | 502 | 503 | 504)
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs `op` up to `policy.max_attempts` times, doubling the delay between attempts
/// (capped at `policy.max_delay_ms`) whenever the error is [`Retryable`]. Returns the
/// first success, the first non-retryable error, or the last retryable error once
/// attempts are exhausted. Honors `cancel` at every sleep point.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> ReplicoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ReplicoreResult<T>>,
{
    let mut delay = Duration::from_millis(policy.initial_delay_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);

    for attempt in 1..=policy.max_attempts.max(1) {
        if cancel.is_cancelled() {
            return Err(ReplicoreError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && e.is_retryable() => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ReplicoreError::Cancelled),
                }
                delay = (delay * 2).min(max_delay);
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("loop always returns before exhausting the range")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_classification() {
        assert!(!ReplicoreError::Cancelled.is_retryable());
        assert!(ReplicoreError::UnexpectedStatus { status: 503, operation: "x".into() }.is_retryable());
        assert!(ReplicoreError::UnexpectedStatus { status: 429, operation: "x".into() }.is_retryable());
        assert!(!ReplicoreError::UnexpectedStatus { status: 404, operation: "x".into() }.is_retryable());
        assert!(!ReplicoreError::UnexpectedStatus { status: 400, operation: "x".into() }.is_retryable());
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1,
            max_delay_ms: 50,
        };
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result = retry(&policy, &cancel, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ReplicoreError::UnexpectedStatus { status: 503, operation: "get".into() })
                } else {
                    crate::Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_terminal_error() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1,
            max_delay_ms: 50,
        };
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: ReplicoreResult<()> = retry(&policy, &cancel, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ReplicoreError::UnexpectedStatus { status: 404, operation: "get".into() }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_honors_cancellation() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: ReplicoreResult<()> = retry(&policy, &cancel, || async {
            Err(ReplicoreError::UnexpectedStatus { status: 503, operation: "get".into() })
        })
        .await;

        assert!(matches!(result, Err(ReplicoreError::Cancelled)));
    }
}
