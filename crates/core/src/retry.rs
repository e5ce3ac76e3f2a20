//! Bounded retries with fixed, linear or exponential back-off.
//!
//! Cancellation is observed both between attempts and while sleeping; a
//! cancelled retry returns the last error immediately instead of finishing
//! the remaining attempts.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::AppError;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before the attempt following 1-indexed attempt `n`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let n = attempt.max(1);
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(n),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(1u32.checked_shl(n - 1).unwrap_or(u32::MAX)),
        }
    }

    /// Run `op` until it succeeds, exhausts `max_attempts`, fails with an
    /// error `is_retryable` rejects, or the shutdown signal fires.
    pub async fn run<T, F, Fut>(
        &self,
        shutdown: &Shutdown,
        is_retryable: impl Fn(&AppError) -> bool,
        mut op: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut last_err: Option<AppError> = None;

        for attempt in 1..=self.max_attempts {
            if shutdown.is_cancelled() {
                return Err(last_err.unwrap_or(AppError::Cancelled));
            }

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !is_retryable(&err) || attempt == self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        error = %err,
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        "operation failed, retrying"
                    );
                    last_err = Some(err);
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            return Err(last_err.take().unwrap_or(AppError::Cancelled));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Err(last_err.unwrap_or(AppError::Cancelled))
    }
}
