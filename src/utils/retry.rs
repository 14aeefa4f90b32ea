// src/utils/retry.rs

//! Bounded retry with a fixed delay.
//!
//! Every external call site (store connect, broker connect, registry reads,
//! HTTP fetches) goes through [`RetryPolicy`] instead of its own sleep loop.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Maximum attempts and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Retry `op` on any error.
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_if(operation, |_| true, op).await
    }

    /// Retry `op` only while `should_retry` accepts the error.
    ///
    /// An error the predicate rejects is returned as-is. Spending every
    /// attempt yields [`AppError::RetriesExhausted`] wrapping the last error.
    pub async fn run_if<T, F, Fut, P>(&self, operation: &str, should_retry: P, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&AppError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{operation} succeeded (attempt {attempt}/{})", self.max_attempts);
                    }
                    return Ok(value);
                }
                Err(e) if !should_retry(&e) => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    log::error!("{operation} failed after {attempt} attempts: {e}");
                    return Err(AppError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: Box::new(e),
                    });
                }
                Err(e) => {
                    log::warn!(
                        "{operation} failed, retry {attempt}/{} in {:?}: {e}",
                        self.max_attempts,
                        self.delay
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn flaky(calls: &AtomicU32, fail_times: u32) -> Result<u32> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= fail_times {
            Err(AppError::HttpStatus {
                url: "https://registry.test".into(),
                status: 503,
            })
        } else {
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let value = policy
            .run("fetch", || async { flaky(&calls, 2) })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::ZERO);
        let err = policy
            .run("connect", || async { flaky(&calls, 100) })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, AppError::RetriesExhausted { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let err = policy
            .run_if("fetch", AppError::is_transient, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AppError::HttpStatus {
                    url: "https://registry.test".into(),
                    status: 404,
                })
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, AppError::HttpStatus { status: 404, .. }));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
