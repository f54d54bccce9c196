//! Shared exponential backoff with jitter.
//!
//! Centralizes the backoff/sleep logic used by every retrying component
//! (LLM orchestrator, scrape client, sync executor) so the schedule lives
//! in one place.

use std::time::Duration;

/// Configuration for exponential backoff with proportional jitter.
///
/// The base delay for attempt N (0-indexed) is `base * 2^N`, capped at
/// `max_delay`; a jitter factor drawn uniformly from `[0.75, 1.25]` is then
/// applied. This keeps every delay within ±25% of the deterministic schedule
/// while avoiding thundering-herd alignment on shared rate limits.
///
/// # Example
///
/// ```
/// use digest_pipeline::backoff::BackoffConfig;
/// use std::time::Duration;
///
/// let config = BackoffConfig::standard();
/// assert_eq!(config.base, Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Base delay, doubled each attempt. Default: 500 ms.
    pub base: Duration,

    /// Cap applied to the exponential term before jitter. Default: 60 s.
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// Sensible defaults for remote APIs: 500ms base, 60s cap.
    pub fn standard() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Backoff with a custom base delay and the standard 60s cap.
    pub fn with_base(base: Duration) -> Self {
        Self {
            base,
            ..Self::standard()
        }
    }

    /// Calculate the jittered delay for attempt N (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self.base.as_secs_f64() * 2f64.powi(attempt.min(32) as i32);
        let capped = exponential.max(0.0).min(self.max_delay.as_secs_f64());
        let jitter = 1.0 + (fastrand::f64() - 0.5) * 0.5;
        Duration::from_secs_f64(capped * jitter)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Sleep with exponential backoff and jitter for the given 0-indexed attempt.
pub async fn sleep_backoff(attempt: u32, config: &BackoffConfig) {
    tokio::time::sleep(config.delay_for_attempt(attempt)).await;
}
