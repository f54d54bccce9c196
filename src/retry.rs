//! Transient-error classification and generic retry with backoff.
//!
//! The classifier decides, from an error's status code and message text,
//! whether another attempt is worth making. [`retry_with_backoff`] drives a
//! future-producing closure through the jittered schedule in
//! [`backoff`](crate::backoff).

use crate::backoff::{sleep_backoff, BackoffConfig};
use crate::error::CoreError;
use std::future::Future;
use std::time::Duration;

/// Message substrings that indicate a transient failure.
const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "connection",
    "network",
    "rate limit",
    "too many requests",
    "temporary",
    "unavailable",
    "gateway",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "try again",
    "retry",
    "deadline exceeded",
    "flood",
    "retry after",
];

/// Check if an HTTP status code represents a retryable error.
///
/// Retryable codes: 408 (request timeout), 429 (too many requests), and 5xx.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

/// Determine whether an error is transient and worth retrying.
///
/// Decision order:
/// 1. A carried HTTP status in `{408, 429, 5xx}` is transient. A 400 whose
///    text mentions "not modified" is explicitly non-transient (the remote
///    edit endpoint reports a benign no-op that way).
/// 2. "message is not modified" / "message_not_modified" anywhere in the
///    text is non-transient.
/// 3. Any transient keyword in the lowercased display text is transient.
/// 4. Transport-level [`CoreError::Request`] failures (connect/timeout) are
///    transient.
pub fn is_transient_error(error: &CoreError) -> bool {
    if let Some(status) = error.status() {
        if is_retryable_status(status) {
            return true;
        }
        if status == 400 && error.to_string().to_lowercase().contains("not modified") {
            return false;
        }
    }

    let text = error.to_string().to_lowercase();
    if text.contains("message is not modified") || text.contains("message_not_modified") {
        return false;
    }
    if TRANSIENT_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return true;
    }

    match error {
        CoreError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        _ => false,
    }
}

/// Retry an async operation with exponential backoff.
///
/// Calls `f` up to `max_retries + 1` times. Non-transient errors abort
/// immediately. Returns `(result, success)`: the value and `true` on
/// success, or `None` and `false` when attempts are exhausted or the error
/// was not worth retrying.
pub async fn retry_with_backoff<T, F, Fut>(
    mut f: F,
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
) -> (Option<T>, bool)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<T>>,
{
    let config = BackoffConfig {
        base: initial_delay,
        max_delay,
    };

    for attempt in 0..=max_retries {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "retry_succeeded");
                }
                return (Some(value), true);
            }
            Err(e) => {
                if attempt >= max_retries {
                    tracing::warn!(
                        error = %e,
                        total_attempts = attempt + 1,
                        "retry_exhausted"
                    );
                    return (None, false);
                }
                if !is_transient_error(&e) {
                    tracing::debug!(error = %e, attempt = attempt + 1, "non_transient_error_no_retry");
                    return (None, false);
                }
                tracing::debug!(
                    error = %e,
                    attempt = attempt + 1,
                    max_retries,
                    "retrying_after_transient_error"
                );
                sleep_backoff(attempt, &config).await;
            }
        }
    }

    (None, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn http_error(status: u16, body: &str) -> CoreError {
        CoreError::Http {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    #[test]
    fn test_retryable_status_codes() {
        assert!(is_retryable_status(408));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn test_transient_by_status() {
        assert!(is_transient_error(&http_error(429, "slow down")));
        assert!(is_transient_error(&http_error(502, "bad gateway")));
        assert!(!is_transient_error(&http_error(401, "bad key")));
    }

    #[test]
    fn test_not_modified_400_is_permanent() {
        assert!(!is_transient_error(&http_error(
            400,
            "Bad Request: message is not modified"
        )));
    }

    #[test]
    fn test_message_not_modified_keyword_is_permanent() {
        // "retry" would otherwise match the keyword list; the not-modified
        // carve-out wins.
        assert!(!is_transient_error(&CoreError::Other(
            "message_not_modified, do not retry".into()
        )));
    }

    #[test]
    fn test_transient_keywords() {
        for msg in [
            "connection reset by peer",
            "deadline exceeded while awaiting headers",
            "Flood control triggered",
            "service Unavailable",
        ] {
            assert!(
                is_transient_error(&CoreError::Other(msg.into())),
                "{msg} should be transient"
            );
        }
        assert!(!is_transient_error(&CoreError::Other("invalid schema".into())));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let (result, success) = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(http_error(503, "unavailable"))
                    } else {
                        Ok(42)
                    }
                }
            },
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .await;

        assert!(success);
        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_aborts_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let (result, success) = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(http_error(401, "forbidden")) }
            },
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .await;

        assert!(!success);
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_on_persistent_transient_error() {
        let calls = AtomicU32::new(0);
        let (result, success) = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(http_error(500, "boom")) }
            },
            2,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .await;

        assert!(!success);
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
