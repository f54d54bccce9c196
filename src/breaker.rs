//! Circuit breaker for calls to flaky external services.
//!
//! Prevents cascading failures when a remote service is down: after
//! `failure_threshold` consecutive failures the breaker opens and rejects
//! requests until `timeout` elapses, then allows probes (half-open) and
//! closes again after `success_threshold` consecutive successes.

use crate::error::{CoreError, Result};
use std::future::Future;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass.
    Closed,
    /// Failures exceeded the threshold; requests are rejected.
    Open,
    /// Testing recovery; limited requests are allowed.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name for logging and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Observable breaker state, for status endpoints and logs.
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub opened_at: Option<Instant>,
    pub last_failure_time: Option<Instant>,
}

/// Three-state circuit breaker.
///
/// Invariants: `state == Closed` implies `opened_at` is unset;
/// `state == Open` implies `opened_at` is set; `success_count` is only
/// meaningful in half-open.
///
/// # Example
///
/// ```
/// use digest_pipeline::breaker::{CircuitBreaker, CircuitState};
/// use std::time::Duration;
///
/// let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60), 2);
/// assert!(breaker.can_proceed());
/// breaker.record_failure();
/// breaker.record_failure();
/// breaker.record_failure();
/// assert!(!breaker.can_proceed());
/// assert_eq!(breaker.state(), CircuitState::Open);
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: Duration,
    success_threshold: u32,

    failure_count: u32,
    success_count: u32,
    state: CircuitState,
    opened_at: Option<Instant>,
    last_failure_time: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `failure_threshold` failures, waits
    /// `timeout` before probing, and closes after `success_threshold`
    /// consecutive half-open successes.
    pub fn new(failure_threshold: u32, timeout: Duration, success_threshold: u32) -> Self {
        Self {
            failure_threshold,
            timeout,
            success_threshold,
            failure_count: 0,
            success_count: 0,
            state: CircuitState::Closed,
            opened_at: None,
            last_failure_time: None,
        }
    }

    /// Current state. Does not trigger the open→half-open transition;
    /// use [`can_proceed`](Self::can_proceed) for gatekeeping.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Check whether a request should be processed.
    ///
    /// The first call after the cooldown has elapsed transitions an open
    /// breaker to half-open and returns `true`.
    pub fn can_proceed(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(opened) = self.opened_at {
                    if opened.elapsed() >= self.timeout {
                        tracing::info!(
                            failure_count = self.failure_count,
                            timeout_secs = self.timeout.as_secs_f64(),
                            "circuit_breaker_half_open"
                        );
                        self.state = CircuitState::HalfOpen;
                        self.success_count = 0;
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful operation. In half-open this tracks recovery.
    pub fn record_success(&mut self) {
        self.success_count += 1;

        if self.state == CircuitState::HalfOpen && self.success_count >= self.success_threshold {
            tracing::info!(
                success_count = self.success_count,
                threshold = self.success_threshold,
                previous_failures = self.failure_count,
                "circuit_breaker_closed"
            );
            self.state = CircuitState::Closed;
            self.failure_count = 0;
            self.opened_at = None;
            self.last_failure_time = None;
        }
    }

    /// Record a failed operation, opening the circuit when the threshold is
    /// crossed. A half-open failure reopens immediately and refreshes the
    /// cooldown.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        match self.state {
            CircuitState::HalfOpen => {
                tracing::warn!(
                    failure_count = self.failure_count,
                    "circuit_breaker_reopened"
                );
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
                self.success_count = 0;
            }
            CircuitState::Closed => {
                if self.failure_count >= self.failure_threshold {
                    tracing::warn!(
                        failure_count = self.failure_count,
                        threshold = self.failure_threshold,
                        "circuit_breaker_opened"
                    );
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker back to the initial closed state.
    pub fn reset(&mut self) {
        tracing::info!(
            previous_state = self.state.as_str(),
            failure_count = self.failure_count,
            "circuit_breaker_reset"
        );
        self.failure_count = 0;
        self.success_count = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.last_failure_time = None;
    }

    /// Snapshot of the breaker state and counters.
    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            opened_at: self.opened_at,
            last_failure_time: self.last_failure_time,
        }
    }

    /// Execute a future under the breaker, recording the outcome.
    ///
    /// Returns [`CoreError::CircuitOpen`] without executing when the breaker
    /// denies the request.
    pub async fn call<T, Fut>(&mut self, f: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if !self.can_proceed() {
            return Err(CoreError::CircuitOpen {
                state: self.state.as_str(),
            });
        }

        match f.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}
