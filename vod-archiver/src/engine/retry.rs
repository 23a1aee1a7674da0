//! Retry loop driven by [`RetryPolicy`].

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::RetryPolicy;
use crate::{Error, Result};

/// Result of a retried operation together with the attempts it took.
#[derive(Debug)]
pub struct AttemptOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Runs an operation with exponential backoff on transient failures.
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails terminally or runs out of attempts.
    ///
    /// `op` receives the 1-indexed attempt number. Only transient failures are
    /// retried; a cancelled backoff sleep ends the loop with [`Error::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        op_name: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> AttemptOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            if attempt > 1 {
                let delay = self.policy.delay_for_attempt(attempt);
                debug!(op = op_name, attempt, "Backing off for {:?}", delay);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return AttemptOutcome { result: Err(Error::Cancelled), attempts: attempt - 1 };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match op(attempt).await {
                Ok(value) => {
                    return AttemptOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    let retryable = e.failure_class().is_retryable();
                    if !retryable || !self.policy.should_retry(attempt) || cancel.is_cancelled() {
                        return AttemptOutcome {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Transient failure, will retry"
                    );
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            use_jitter: false,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempts() {
        let controller = RetryController::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let outcome: AttemptOutcome<()> = controller
            .run("op", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::transient("timeout")) }
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let controller = RetryController::new(fast_policy(5));
        let outcome = controller
            .run("op", &CancellationToken::new(), |attempt| async move {
                if attempt < 3 {
                    Err(Error::transient("flaky"))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_auth_failure_short_circuits() {
        let controller = RetryController::new(fast_policy(5));
        let outcome: AttemptOutcome<()> = controller
            .run("op", &CancellationToken::new(), |_| async {
                Err(Error::unauthorized("401"))
            })
            .await;

        assert!(matches!(outcome.result, Err(Error::Unauthorized(_))));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_short_circuits() {
        let controller = RetryController::new(fast_policy(5));
        let outcome: AttemptOutcome<()> = controller
            .run("op", &CancellationToken::new(), |_| async {
                Err(Error::storage("No space left on device"))
            })
            .await;

        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_retrying() {
        let controller = RetryController::new(fast_policy(5));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let outcome: AttemptOutcome<()> = controller
            .run("op", &cancel, |_| {
                trigger.cancel();
                async { Err(Error::transient("timeout")) }
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(Error::Transient(_))));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let controller = RetryController::new(RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
            use_jitter: false,
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome: AttemptOutcome<()> = controller
            .run("op", &cancel, |_| async { Err(Error::transient("timeout")) })
            .await;

        assert!(matches!(outcome.result, Err(Error::Cancelled)));
        assert_eq!(outcome.attempts, 1);
    }
}
