//! Exponential backoff for idempotent chain calls.
//!
//! Delay before retry `n` (1-based) is `min(base * 2^(n-1), max)`. Only
//! errors reporting `is_transient()` are retried; anything else is returned
//! on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::chain::ChainError;
use crate::verification::error::VerifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for ChainError {
    fn is_transient(&self) -> bool {
        ChainError::is_transient(self)
    }
}

impl Retryable for VerifyError {
    fn is_transient(&self) -> bool {
        VerifyError::is_transient(self)
    }
}

pub async fn with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{operation} attempt {attempt}/{attempts} failed: {e}, retrying after {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
