//! Retry/backoff policy
//!
//! Decides, after a failed attempt, whether a job is re-admitted after a
//! delay or moved to `Failed`.

use std::time::Duration;

/// Exponential backoff with a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay unit, multiplied by `2^retry_count`
    pub base: Duration,
    /// Upper bound on any single delay
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
        }
    }
}

/// Outcome of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-admit after `delay`; `retry_count` is the incremented count
    Retry { retry_count: u32, delay: Duration },
    /// Retries exhausted
    Fail,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// `min(base * 2^retry_count, cap)`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.base
            .checked_mul(2u32.saturating_pow(retry_count))
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// The delay is computed from the count after the increment, so the first
    /// retry waits `2 * base`.
    pub fn decide(&self, retry_count: u32, max_retries: u32) -> RetryDecision {
        if retry_count < max_retries {
            let retry_count = retry_count + 1;
            RetryDecision::Retry {
                retry_count,
                delay: self.delay_for(retry_count),
            }
        } else {
            RetryDecision::Fail
        }
    }
}
