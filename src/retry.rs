//! Bounded Retry with Backoff
//!
//! Control-plane calls made while the cluster is deliberately degraded fail
//! transiently all the time. Naive tight retry loops against the API server
//! can themselves induce load that skews timing measurements, so retries are
//! bounded, exponentially backed off, and jittered.
//!
//! Only errors classified transient by `ClusterError::is_transient` are
//! retried; rejections (forbidden, not found) and unreachable-control-plane
//! errors fail immediately.

use std::time::Duration;
use tokio::time::sleep;

use crate::cluster::ClusterError;

/// Retry policy for control-plane calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: usize,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Cap on the backed-off delay.
    pub max_delay: Duration,

    /// Jitter factor (0.0 to 1.0) applied to each delay so concurrent
    /// pollers do not synchronize.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay for a given attempt: base_delay * 2^attempt, jittered, capped.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let exponential = self.base_delay * 2_u32.saturating_pow(attempt as u32);
        let jitter_range = exponential.mul_f64(self.jitter);
        let offset = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range.as_secs_f64();
        exponential
            .saturating_add(Duration::from_secs_f64(offset.abs()))
            .min(self.max_delay)
    }
}

/// Retry a control-plane operation with exponential backoff.
///
/// Returns the first success, or the last error once attempts are exhausted
/// or a non-transient error is seen.
pub async fn retry_cluster_op<F, T, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ClusterError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!("control-plane call succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(err) if attempt + 1 < config.max_attempts && err.is_transient() => {
                let delay = config.calculate_delay(attempt);
                tracing::warn!(
                    "transient control-plane error (attempt {}): {}, retrying in {:?}",
                    attempt + 1,
                    err,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
