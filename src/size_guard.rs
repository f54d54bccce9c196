//! Response-size budget enforcement.
//!
//! Applied uniformly before parsing scrape, search, LLM, and crawl
//! responses so a malicious or corrupted upstream cannot exhaust memory.

use crate::error::{CoreError, Result};

/// Hard ceiling on any configured budget.
pub const MAX_BUDGET_BYTES: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Validate a response's size against `max_bytes` before parsing.
///
/// Checks `Content-Length` when present; between 50% and 100% of the budget
/// a warning is logged. When the header is absent, falls back to the
/// already-buffered body length if the caller has one.
///
/// Errors with [`CoreError::ResponseTooLarge`] carrying `(actual, max)`, or
/// [`CoreError::Config`] for an invalid budget.
pub fn validate_response_size(
    content_length: Option<u64>,
    buffered_len: Option<u64>,
    max_bytes: u64,
    service_name: &str,
) -> Result<()> {
    if max_bytes == 0 {
        return Err(CoreError::config(
            "max response size must be a positive integer",
            "max_bytes",
            max_bytes,
        ));
    }
    if max_bytes > MAX_BUDGET_BYTES {
        return Err(CoreError::config(
            "max response size too large (max 1GiB)",
            "max_bytes",
            max_bytes,
        ));
    }

    if let Some(length) = content_length {
        if length > max_bytes {
            tracing::error!(
                service = service_name,
                content_length = length,
                max_size = max_bytes,
                "response_size_exceeded"
            );
            return Err(CoreError::ResponseTooLarge {
                actual: length,
                max: max_bytes,
            });
        }
        if length * 2 > max_bytes {
            tracing::warn!(
                service = service_name,
                content_length = length,
                max_size = max_bytes,
                percentage = (100.0 * length as f64 / max_bytes as f64).round(),
                "large_response_size"
            );
        }
        return Ok(());
    }

    // No Content-Length header: check whatever the caller already buffered.
    if let Some(actual) = buffered_len {
        if actual > max_bytes {
            tracing::error!(
                service = service_name,
                actual_size = actual,
                max_size = max_bytes,
                "response_size_exceeded_no_header"
            );
            return Err(CoreError::ResponseTooLarge {
                actual,
                max: max_bytes,
            });
        }
    } else {
        tracing::debug!(
            service = service_name,
            reason = "no_content_length_header",
            "response_size_validation_skipped"
        );
    }

    Ok(())
}

/// Convenience: run the guard against a `reqwest::Response` before reading
/// its body.
pub fn validate_response(
    response: &reqwest::Response,
    max_bytes: u64,
    service_name: &str,
) -> Result<()> {
    validate_response_size(response.content_length(), None, max_bytes, service_name)
}
