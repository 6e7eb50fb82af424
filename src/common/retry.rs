use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Retry policy for transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied per retry
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: Option<u64>,
    /// Add up to 25% random jitter to each delay
    #[serde(default = "default_use_jitter")]
    pub use_jitter: bool,
}

fn default_max_retries() -> usize {
    std::env::var("SHOPDESK_REFRESH_RETRIES")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(2)
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> Option<u64> {
    Some(2_000)
}

fn default_use_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            use_jitter: default_use_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            backoff_factor: 1.0,
            max_delay_ms: None,
            use_jitter: false,
        }
    }

    /// Same delay before every retry
    pub fn fixed_delay(max_retries: usize, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: delay.as_millis() as u64,
            backoff_factor: 1.0,
            max_delay_ms: None,
            use_jitter: false,
        }
    }

    /// Delay grows by `backoff_factor` each retry, capped at `max_delay`
    pub fn exponential_backoff(
        max_retries: usize,
        base_delay: Duration,
        backoff_factor: f64,
        max_delay: Option<Duration>,
    ) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
            backoff_factor,
            max_delay_ms: max_delay.map(|d| d.as_millis() as u64),
            use_jitter: true,
        }
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based)
    pub fn calculate_delay(&self, retry: usize) -> Duration {
        if retry == 0 || retry > self.max_retries {
            return Duration::ZERO;
        }

        let mut delay_ms =
            self.base_delay_ms as f64 * self.backoff_factor.powf((retry - 1) as f64);

        if let Some(max) = self.max_delay_ms {
            delay_ms = delay_ms.min(max as f64);
        }

        if self.use_jitter {
            delay_ms += delay_ms * fastrand::f64() * 0.25;
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Run `operation` until it succeeds, returns an error `should_retry`
/// rejects, or the policy's attempts run out. The last error is returned.
pub async fn with_retry_if<T, E, F, Fut, P>(
    operation: F,
    policy: &RetryPolicy,
    log_context: &str,
    should_retry: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", log_context, attempt);
                }
                return Ok(value);
            }
            Err(e) if !should_retry(&e) => {
                debug!("{} failed with a non-retryable error: {}", log_context, e);
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                error!("{} failed after {} attempts: {}", log_context, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.calculate_delay(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    log_context, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
