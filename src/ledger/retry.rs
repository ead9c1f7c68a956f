use std::future::Future;
use std::time::Duration;

use metrics::counter;

use crate::errors::LedgerError;

/// Bounded retry for `ConcurrencyConflict`, plus the per-commit timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Backoff before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
            timeout: Duration::from_millis(5_000),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. `op` must rebuild its commit from fresh reads on
/// each call; replaying a stale commit would conflict forever.
pub async fn with_conflict_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Err(e) if e.is_retryable() => {
                counter!("ledger_conflict_retries_total").increment(1);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Ledger conflict, retrying"
                );
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff * attempt).await;
                }
            }
            other => return other,
        }
    }
    Err(LedgerError::ConcurrentModificationRetryExceeded { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_conflict_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_conflict_retry(&fast_policy(), "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LedgerError::ConcurrencyConflict("busy".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_conflict_budget_exhausted() {
        let result: Result<(), _> = with_conflict_retry(&fast_policy(), "test", || async {
            Err(LedgerError::ConcurrencyConflict("busy".into()))
        })
        .await;
        assert!(matches!(
            result,
            Err(LedgerError::ConcurrentModificationRetryExceeded { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_conflict_retry(&fast_policy(), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::InvalidAmount("zero".into()))
        })
        .await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
