//! Bounded retry for backend calls.
//!
//! Each attempt runs under its own timeout; an attempt that overruns is
//! reported as `BackendUnavailable`. Only retryable errors (see
//! [`GatewayError::is_retryable`]) are attempted again, after an
//! exponentially growing, jittered delay.

use crate::config::NetworkConfig;
use crate::error::{GatewayError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and timeout settings for one backend operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomise each delay to between 0.5x and 1.5x its nominal value.
    pub jitter: bool,
    /// Deadline for a single attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: NetworkConfig::MAX_RETRIES,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            jitter: true,
            attempt_timeout: Some(NetworkConfig::FETCH_TIMEOUT),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single attempt with no retry.
    pub fn once() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Delay before retry number `retry` (0-indexed), capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let nominal = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.min(16)))
            .min(self.max_delay);
        if !self.jitter {
            return nominal;
        }
        let factor: f64 = rand::rng().random_range(0.5..1.5);
        nominal.mul_f64(factor).min(self.max_delay)
    }
}

/// What happened during a retried call.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub timeouts: u32,
    pub total_delay: Duration,
    pub last_error: Option<String>,
}

/// Run `operation` against `resource` until it succeeds, fails with a
/// non-retryable error, or the attempts run out.
pub async fn retry_backend<F, Fut, T>(
    config: &RetryConfig,
    resource: &str,
    mut operation: F,
) -> (Result<T>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut stats = RetryStats::default();
    let max_attempts = config.max_attempts.max(1);

    loop {
        stats.attempts += 1;

        let outcome = match config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => {
                    stats.timeouts += 1;
                    Err(GatewayError::unavailable(
                        resource,
                        format!("request timed out after {:?}", limit),
                    ))
                }
            },
            None => operation().await,
        };

        let err = match outcome {
            Ok(value) => {
                if stats.attempts > 1 {
                    debug!("{} succeeded after {} attempts", resource, stats.attempts);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };
        stats.last_error = Some(err.to_string());

        if !err.is_retryable() {
            return (Err(err), stats);
        }
        if stats.attempts >= max_attempts {
            if max_attempts > 1 {
                warn!("{}: giving up after {} attempts: {}", resource, stats.attempts, err);
            }
            return (Err(err), stats);
        }

        let delay = config.backoff(stats.attempts - 1);
        stats.total_delay += delay;
        warn!(
            "{}: attempt {}/{} failed: {}. Retrying in {:?}",
            resource, stats.attempts, max_attempts, err, delay
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay(Duration::from_millis(10))
            .with_jitter(false)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(false);
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(2), Duration::from_millis(400));
        assert_eq!(config.backoff(3), Duration::from_millis(500));
        assert_eq!(config.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_jitter_range() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(10));
        for _ in 0..20 {
            let delay = config.backoff(0);
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_unavailable_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let (result, stats) = retry_backend(&fast().with_max_attempts(3), "h1", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GatewayError::unavailable("h1", "503"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(stats.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let (result, stats) = retry_backend(&fast(), "h1", || async {
            Err::<(), _>(GatewayError::ObjectNotFound {
                bucket: "b".into(),
                key: "k".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(GatewayError::ObjectNotFound { .. })));
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_unavailable() {
        let config = fast()
            .with_max_attempts(2)
            .with_attempt_timeout(Some(Duration::from_millis(50)));

        let (result, stats) = retry_backend(&config, "h1", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(GatewayError::BackendUnavailable { .. })));
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.timeouts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reports_last_error() {
        let (result, stats) = retry_backend(&fast().with_max_attempts(2), "h1", || async {
            Err::<(), _>(GatewayError::unavailable("h1", "connection refused"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 2);
        assert!(stats.last_error.unwrap().contains("connection refused"));
    }
}
