//! Exponential-backoff retry for single commands.

use std::future::Future;
use std::time::Duration;

use switchover_core::CommandError;
use tracing::debug;

use crate::config::RetryConfig;

/// Upper bound on a single backoff delay; deep attempt counts saturate
/// here instead of overflowing the exponent.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Re-runs a failing command according to a [`RetryConfig`].
///
/// Only failure kinds the config includes are retried; anything else is
/// returned to the caller immediately. When attempts are exhausted the
/// last error is returned.
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    /// Create a retry executor from a configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `call` up to `max_attempts` times, sleeping
    /// `wait_duration * multiplier^(n-1)`, capped at 30 seconds,
    /// before the n-th retry.
    pub async fn execute<F, Fut, T>(&self, mut call: F) -> Result<T, CommandError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.config.max_attempts || !self.config.retries(error.kind()) {
                        return Err(error);
                    }
                    let delay = self
                        .config
                        .backoff_multiplier
                        .checked_pow(attempt - 1)
                        .and_then(|factor| self.config.wait_duration.checked_mul(factor))
                        .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY));
                    debug!(
                        attempt,
                        kind = ?error.kind(),
                        delay = ?delay,
                        "command failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
