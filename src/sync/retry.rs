//! Retry wrapper for high-level sync actions.
//!
//! Deliberately separate from the HTTP client's wire-level retries: this
//! retries whole operations (create/update bookmark, attach tags) to mask
//! brief remote outages, using the same transient classifier.

use crate::error::{CoreError, Result};
use crate::retry::is_transient_error;
use std::future::Future;
use std::time::Duration;

/// Outcome of a retried sync operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Option<T>,
    pub success: bool,
    /// Whether the final failure was transient (informs error partitioning).
    pub retryable: bool,
    pub last_error: Option<CoreError>,
}

impl<T> RetryOutcome<T> {
    /// Render the last error for result error lists.
    pub fn error_text(&self) -> String {
        self.last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Transient-aware retry executor for sync operations.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryExecutor {
    /// Run `f` with retries on transient failures.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut f: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        let mut delay = self.base_delay;

        loop {
            match f().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Some(value),
                        success: true,
                        retryable: false,
                        last_error: None,
                    };
                }
                Err(e) => {
                    let retryable = is_transient_error(&e);
                    if !retryable || attempt >= self.max_retries {
                        if retryable {
                            tracing::warn!(
                                operation = operation_name,
                                attempts = attempt + 1,
                                error = %e,
                                "sync_retry_exhausted"
                            );
                        }
                        return RetryOutcome {
                            result: None,
                            success: false,
                            retryable,
                            last_error: Some(e),
                        };
                    }
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.min(self.max_delay).as_millis() as u64,
                        error = %e,
                        "sync_retrying"
                    );
                    tokio::time::sleep(delay.min(self.max_delay)).await;
                    delay = Duration::from_secs_f64(delay.as_secs_f64() * self.backoff_factor);
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

    fn fast_executor() -> RetryExecutor {
        RetryExecutor {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    fn transient() -> CoreError {
        CoreError::Http {
            status: 503,
            body: "unavailable".into(),
            retry_after: None,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = fast_executor()
            .run("create_bookmark", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok("bm1")
                    }
                }
            })
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.result, Some("bm1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = fast_executor()
            .run("attach_tags", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(CoreError::Http {
                        status: 401,
                        body: "no".into(),
                        retry_after: None,
                    })
                }
            })
            .await;

        assert!(!outcome.success);
        assert!(!outcome.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.error_text().contains("401"));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_retryable() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = fast_executor()
            .run("update_bookmark", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(!outcome.success);
        assert!(outcome.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
