use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// `base_delay * 2^attempt`, saturating instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or
/// `max_retries` rate-limited attempts have been retried.
///
/// Only [`crate::error::AgentError::RateLimited`] is retried. Attempts are strictly
/// sequential and the sleep blocks the caller.
pub async fn retry_with_backoff<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_rate_limited() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{} rate limited ({}); retry {}/{} in {:?}",
                    label,
                    error,
                    attempt + 1,
                    policy.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                if error.is_rate_limited() {
                    tracing::error!("{} still rate limited after {} retries", label, attempt);
                }
                return Err(error);
            }
        }
    }
}
