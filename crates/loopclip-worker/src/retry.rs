//! Retry helpers for the worker's own infrastructure calls.
//!
//! Job-level retries live in the scheduler; these cover connecting to the
//! queue at start-up and keeping the poll loops from flooding the logs.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Calculate delay for a given retry number (1-based).
    fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }
}

/// Execute an async operation, retrying failures with exponential backoff.
///
/// Returns the last error once retries are exhausted.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retry = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if retry < config.max_retries => {
                retry += 1;
                let delay = config.delay_for_retry(retry);
                warn!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, retry, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Consecutive-failure counter for a poll loop.
///
/// The first `max_logged` failures in a row are reported; after that the loop
/// goes quiet until it succeeds again.
#[derive(Debug)]
pub struct FailureTracker {
    loop_name: &'static str,
    consecutive: u32,
    max_logged: u32,
}

impl FailureTracker {
    pub fn new(loop_name: &'static str, max_logged: u32) -> Self {
        Self {
            loop_name,
            consecutive: 0,
            max_logged,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > self.max_logged {
            debug!(
                "{} recovered after {} consecutive failures",
                self.loop_name, self.consecutive
            );
        }
        self.consecutive = 0;
    }

    /// Count a failure; `true` when the caller should log it.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);

        if self.consecutive == self.max_logged + 1 {
            warn!(
                "{} failed {} times in a row; suppressing further errors",
                self.loop_name, self.max_logged
            );
        }
        self.consecutive <= self.max_logged
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(100));

        assert_eq!(config.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_retry(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_retry(40), Duration::from_secs(10));
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new("poll", 2);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_eventual_success() {
        let config = RetryConfig::new("connect");
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection refused")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_gives_up() {
        let config = RetryConfig::new("connect").with_max_retries(2);
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = retry_async(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("connection refused") }
        })
        .await;

        assert_eq!(result, Err("connection refused"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
