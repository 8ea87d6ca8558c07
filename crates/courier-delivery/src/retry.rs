//! Exponential backoff for queued retries.
//!
//! Delays are deterministic: `min(2^attempt * base, max)` with no jitter, so
//! a job that has failed `n` times waits exactly `backoff_delay(n)` before the
//! next pass.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy for queued jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Highest attempt count a job may reach and still be retried.
    pub max_attempts: u32,

    /// Delay for attempt 0.
    pub base_delay: Duration,

    /// Upper bound on any delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }
}

/// What the processor does with a job after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the job at the head and try again after `delay`.
    Retry {
        /// Wait before the next pass
        delay: Duration,
    },
    /// Remove the job and record a terminal failure.
    GiveUp {
        /// Final error to record
        error: DeliveryError,
    },
}

impl RetryPolicy {
    /// Delay before the next pass for a job that has failed `attempt` times.
    ///
    /// Attempts 0 through 5 with the default policy give 1 s, 2 s, 4 s, 8 s,
    /// 16 s and 32 s; anything above stays at 32 s.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.min(31));
        std::cmp::min(self.base_delay.saturating_mul(multiplier), self.max_delay)
    }

    /// Decides the fate of a job whose attempt counter was just incremented
    /// to `attempt` after failing with `error`.
    pub fn decide(&self, attempt: u32, error: DeliveryError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp { error };
        }

        if attempt > self.max_attempts {
            return RetryDecision::GiveUp {
                error: DeliveryError::RetriesExhausted { attempts: attempt },
            };
        }

        RetryDecision::Retry { delay: self.backoff_delay(attempt) }
    }
}
