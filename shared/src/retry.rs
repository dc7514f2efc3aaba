use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::classify;

/// Bounded exponential backoff: `max_attempts` total tries, waiting
/// `base_delay * 2^i` before retry `i`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt)
    }
}

/// A connection handle whose lifecycle is owned outside the executor.
/// The executor only triggers best-effort reconnect cycles between
/// attempts; it never owns or closes the handle itself.
#[async_trait]
pub trait Reconnect {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

/// Runs `operation`, absorbing transient connection failures up to the
/// policy's attempt budget.
///
/// Permanent errors propagate unchanged on first occurrence. Transient
/// errors trigger a backoff sleep and a disconnect/connect cycle on the
/// handle; a failed reconnect is logged and the next attempt proceeds
/// regardless. Once the budget is exhausted the last error propagates.
pub async fn execute_with_retry<H, F, Fut, T>(
    handle: &H,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T>
where
    H: Reconnect + Sync,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!("Database operation recovered on attempt {}", attempt + 1);
                }
                return Ok(value);
            }
            Err(err) if classify::is_transient(&err) => {
                warn!(
                    "Transient database error on attempt {}/{}: {:#}",
                    attempt + 1,
                    policy.max_attempts,
                    err
                );
                last_error = Some(err);

                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                    if let Err(err) = handle.disconnect().await {
                        warn!("Disconnect before retry failed: {:#}", err);
                    }
                    if let Err(err) = handle.connect().await {
                        warn!("Reconnect failed, next attempt proceeds anyway: {:#}", err);
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow!("database operation failed after {} attempts", policy.max_attempts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Default)]
    struct FakeHandle {
        connects: AtomicU32,
        disconnects: AtomicU32,
        fail_connect: bool,
    }

    #[async_trait]
    impl Reconnect for FakeHandle {
        async fn connect(&self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                Err(anyhow!("could not connect to server"))
            } else {
                Ok(())
            }
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn flaky_operation(
        attempts: &Arc<AtomicU32>,
        failures_before_success: u32,
        error: &'static str,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<u32>> + Send>> {
        let attempts = Arc::clone(attempts);
        move || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < failures_before_success {
                    Err(anyhow!(error))
                } else {
                    Ok(n + 1)
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_on_success() {
        let handle = FakeHandle::default();
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = execute_with_retry(&handle, &policy, flaky_operation(&attempts, 0, "unused"))
            .await
            .unwrap();

        assert_eq!(result, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(handle.connects.load(Ordering::SeqCst), 0);
        assert_eq!(handle.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_with_doubling_backoff() {
        let handle = FakeHandle::default();
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = execute_with_retry(
            &handle,
            &policy,
            flaky_operation(&attempts, 2, "connection reset by peer"),
        )
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two retries: 1000ms * 2^0 + 1000ms * 2^1.
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
        assert_eq!(handle.connects.load(Ordering::SeqCst), 2);
        assert_eq!(handle.disconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_and_propagates_last_error() {
        let handle = FakeHandle::default();
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let err = execute_with_retry(
            &handle,
            &policy,
            flaky_operation(&attempts, u32::MAX, "connection reset by peer"),
        )
        .await
        .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("connection reset"));
        // No backoff after the final attempt.
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_fail_fast() {
        let handle = FakeHandle::default();
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let err = execute_with_retry(
            &handle,
            &policy,
            flaky_operation(&attempts, u32::MAX, "duplicate key value violates unique constraint"),
        )
        .await
        .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("duplicate key"));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(handle.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_failure_does_not_abort_the_loop() {
        let handle = FakeHandle {
            fail_connect: true,
            ..FakeHandle::default()
        };
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = execute_with_retry(
            &handle,
            &policy,
            flaky_operation(&attempts, 1, "server closed the connection unexpectedly"),
        )
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(handle.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }
}
