//! Bounded retry for out-of-process I/O
//!
//! The reasoning-service call and the structured-store write can take
//! multiple seconds and fail transiently. Transient failures (network,
//! 5xx-class) are retried a bounded number of times with exponential
//! backoff; validation-class failures are never retried.

use std::time::Duration;

use crate::error::{ImportError, Result};

/// Attempts made in total (first call + retries)
pub const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff; doubles per retry, capped at 2s
const INITIAL_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 2000;

/// Retry an operation while it fails with `ImportError::TransientIo`.
///
/// Any other error class returns immediately.
pub async fn retry_transient<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    for attempt in 1..=MAX_ATTEMPTS {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(ImportError::TransientIo(msg)) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    error = %msg,
                    "Transient failure, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let result = retry_transient("test_op", || async { Ok::<i32, ImportError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);

        let result = retry_transient("test_op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(ImportError::TransientIo("connection reset".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn validation_error_fails_immediately() {
        let attempts = AtomicU32::new(0);

        let result: Result<i32> = retry_transient("test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ImportError::Validation("bad row".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ImportError::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: Result<i32> = retry_transient("test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ImportError::TransientIo("still down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ImportError::TransientIo(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
