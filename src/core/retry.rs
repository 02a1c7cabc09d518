//! Bounded retry with randomized backoff.
//!
//! Shared by the order-index allocator and the queue drain. Retries are bounded
//! by attempt count only; there is no wall-clock deadline.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::{Result, SyncError};

/// Attempt budget and backoff window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            min_backoff: Duration::from_millis(config.min_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps; handy for tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Pick a random delay inside the backoff window.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        let (lo, hi) = if self.min_backoff <= self.max_backoff {
            (self.min_backoff, self.max_backoff)
        } else {
            (self.max_backoff, self.min_backoff)
        };
        let lo_ms = u64::try_from(lo.as_millis()).unwrap_or(u64::MAX);
        let hi_ms = u64::try_from(hi.as_millis()).unwrap_or(u64::MAX);
        if lo_ms == hi_ms {
            return lo;
        }
        Duration::from_millis(rand::rng().random_range(lo_ms..=hi_ms))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// `op` receives the zero-based attempt number so callers can vary their
    /// input between attempts.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error unchanged, or
    /// `SyncError::RetriesExhausted` wrapping the last retryable one.
    pub async fn run<T, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&SyncError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(SyncError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    let delay = self.backoff();
                    debug!(attempt, ?delay, error = %e, "retrying after backoff");
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }
}
