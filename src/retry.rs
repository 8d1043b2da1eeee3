//! Exponential backoff for caller-driven retries.
//!
//! The upload client never retries on its own; the front end uses this to
//! give photos that failed during a sync pass a few more attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_secs: 5,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-indexed):
    /// `min(base * 2^retry, max) + jitter(0..base)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let jitter = if self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        Duration::from_secs(exp.min(self.max_delay_secs) + jitter)
    }
}

/// Run `operation` until it succeeds, `max_retries` retries are spent, or
/// `classifier` says the error is permanent.
///
/// The closure receives the 0-indexed attempt number. Returns the last error
/// when every attempt failed or the classifier aborted.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    label: &str,
    classifier: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if classifier(&e) == RetryAction::Abort => {
                tracing::debug!("{} failed permanently: {}", label, e);
                return Err(e);
            }
            Err(e) if attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.delay_for_retry(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {}s: {}",
                    label,
                    attempt + 1,
                    config.max_retries + 1,
                    delay.as_secs(),
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
