use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use thirtyfour::error::WebDriverError;
use tokio::time::sleep;
use tracing::warn;

/// Bounded exponential backoff for the driver-facing operations. One
/// policy value is shared per run; it carries no state between calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1500),
            backoff_multiplier: 1.5,
        }
    }
}

/// Only automation-driver failures (element waits, navigation, session
/// I/O) are worth another attempt. Application errors propagate at once.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<WebDriverError>().is_some()
}

/// Run `op`, retrying per `policy` on retryable errors. The last error is
/// returned unchanged once retries are exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    warn!(
                        attempts = attempt,
                        "{label} exhausted retries: {err:#}"
                    );
                    return Err(err);
                }
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "{label} failed ({err}), retrying"
                );
                sleep(delay).await;
                delay = delay.mul_f64(policy.backoff_multiplier);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 1.5,
        }
    }

    fn driver_error() -> anyhow::Error {
        anyhow::Error::new(WebDriverError::CustomError("wait timed out".into()))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&quick_policy(3), "op", || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(driver_error())
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_original_error_after_n_plus_one_attempts() {
        let attempts = AtomicU32::new(0);
        let err = with_retry(&quick_policy(2), "op", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(driver_error())
        })
        .await
        .unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(err.downcast_ref::<WebDriverError>().is_some());
    }

    #[tokio::test]
    async fn application_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let err = with_retry(&quick_policy(5), "op", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("reply generator refused"))
        })
        .await
        .unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(err.downcast_ref::<WebDriverError>().is_none());
    }
}
