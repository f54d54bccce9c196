use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the orchestration core and its components.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned when a remote service answers with a non-success status code.
    /// The `retry_after` field is populated from the `Retry-After` response
    /// header (or a body hint) when present.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` value, if present.
        retry_after: Option<Duration>,
    },

    /// A response exceeded the configured size budget before parsing.
    #[error("response size ({actual} bytes) exceeds limit ({max} bytes)")]
    ResponseTooLarge {
        /// Observed size in bytes (Content-Length or buffered body length).
        actual: u64,
        /// Configured budget in bytes.
        max: u64,
    },

    /// Caller-supplied request parameters were rejected before any wire call.
    ///
    /// `context` identifies the offending field for logging and user messages.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        context: BTreeMap<String, String>,
    },

    /// Invalid configuration detected at construction time.
    #[error("invalid configuration: {message}")]
    Config {
        message: String,
        context: BTreeMap<String, String>,
    },

    /// The circuit breaker denied the request; no attempt was made.
    #[error("circuit breaker is {state}")]
    CircuitOpen { state: &'static str },

    /// The operation was cancelled cooperatively.
    #[error("operation was cancelled")]
    Cancelled,

    /// The video storage budget is exhausted and cleanup could not free space.
    #[error("storage limit exceeded; unable to download new videos until cleanup frees space")]
    StorageBudgetExceeded,

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Build a validation error with a single-field context map.
    pub fn validation(message: impl Into<String>, field: &str, value: impl ToString) -> Self {
        let mut context = BTreeMap::new();
        context.insert("parameter".to_string(), field.to_string());
        context.insert("value".to_string(), value.to_string());
        CoreError::Validation {
            message: message.into(),
            context,
        }
    }

    /// Build a configuration error with a single-field context map.
    pub fn config(message: impl Into<String>, field: &str, value: impl ToString) -> Self {
        let mut context = BTreeMap::new();
        context.insert("parameter".to_string(), field.to_string());
        context.insert("value".to_string(), value.to_string());
        CoreError::Config {
            message: message.into(),
            context,
        }
    }

    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CoreError::Http { status, .. } => Some(*status),
            CoreError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
