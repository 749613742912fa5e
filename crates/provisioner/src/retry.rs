//! Retry logic with exponential backoff.
//!
//! Only errors the caller's predicate accepts are retried. Everything else
//! returns on the first failure.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::duration_ms;
use crate::store::{StoreError, StoreResult};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 8_000;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure. Doubles on every further failure.
    #[serde(
        rename = "base_delay_ms",
        with = "duration_ms",
        default = "default_base_delay"
    )]
    pub base_delay: Duration,

    /// Cap on a single delay.
    #[serde(
        rename = "max_delay_ms",
        with = "duration_ms",
        default = "default_max_delay"
    )]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt ceiling and base delay.
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }

    /// Policy that retries without sleeping.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2_u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Attempts actually made. A policy of zero still tries once.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the policy is exhausted. Returns the last error on failure.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_async<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
    should_retry: P,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
    P: Fn(&StoreError) -> bool,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match attempt_fn().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < max_attempts && should_retry(&err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt = attempt.saturating_add(1);
            }
            Err(err) => return Err(err),
        }
    }
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_base_delay() -> Duration {
    Duration::from_millis(DEFAULT_BASE_DELAY_MS)
}

const fn default_max_delay() -> Duration {
    Duration::from_millis(DEFAULT_MAX_DELAY_MS)
}
