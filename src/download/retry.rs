//! Retry configuration and the shared retry helper.
//!
//! Every HTTP request the downloader issues goes through [`with_retry()`],
//! keeping the backoff policy in a single place.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::telemetry;
use crate::{MuninnError, Result};

/// Status codes retried by default.
pub const DEFAULT_RETRY_STATUSES: [u16; 6] = [403, 408, 500, 502, 503, 504];

/// Configuration for retry behaviour on transient HTTP failures.
///
/// Exponential backoff: `initial_delay * 2^attempt`, capped at `max_delay`.
///
/// ```rust
/// # use muninn::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_retries(5)
///     .initial_delay(Duration::from_millis(100));
/// assert_eq!(config.max_attempts(), 6);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial request. Default: 3.
    pub max_retries: u32,
    /// Base delay before the first retry. Default: 300ms.
    pub initial_delay: Duration,
    /// Maximum delay between retries. Default: 10s.
    pub max_delay: Duration,
    /// HTTP statuses treated as transient.
    pub statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Replace the set of retried statuses.
    pub fn statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.statuses = statuses.into();
        self
    }

    /// Total attempts including the initial request.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether `status` is in the retry set.
    pub fn is_retryable(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Execute an async operation with retry logic.
///
/// Retries errors classified by [`MuninnError::is_transient()`] up to
/// `config.max_attempts()`. Permanent errors return immediately; an
/// exhausted budget becomes `DownloadFailed`.
pub(crate) async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts();
    let mut last_err = None;
    for attempt in 0..max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => {
                if attempt + 1 < max_attempts {
                    metrics::counter!(telemetry::DOWNLOAD_RETRIES_TOTAL, "operation" => operation.to_owned())
                        .increment(1);
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(MuninnError::DownloadFailed(match last_err {
        Some(e) => format!("{operation}: {e} after {max_attempts} attempts"),
        None => format!("{operation}: no attempts made"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
    }

    #[test]
    fn default_status_set() {
        let config = RetryConfig::default();
        for status in [403, 408, 500, 502, 503, 504] {
            assert!(config.is_retryable(status));
        }
        assert!(!config.is_retryable(404));
        assert!(!config.is_retryable(429));
    }

    #[tokio::test]
    async fn exhausted_budget_becomes_download_failed() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1));
        let result: Result<()> = with_retry(&config, "test", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(MuninnError::TransientFetch { status: 503 }) }
        })
        .await;
        assert!(matches!(result, Err(MuninnError::DownloadFailed(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryConfig::new(), "test", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(MuninnError::DownloadFailed("HTTP 404".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
