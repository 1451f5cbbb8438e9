//! Retry policy for a single source attempt.
//!
//! This path is latency-sensitive, so the policy allows exactly one retry with a
//! small random jitter instead of exponential backoff.

use crate::error_code::NoBidReason;
use crate::types::AttemptOutcome;
use crate::{Error, ErrorContext, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry logic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per source per run, including the first.
    pub max_attempts: u32,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            jitter_min_ms: 10,
            jitter_max_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_jitter(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.jitter_min_ms = min_ms;
        self.jitter_max_ms = max_ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::configuration_with_context(
                "max_attempts must be >= 1",
                ErrorContext::new()
                    .with_field_path("retry.max_attempts")
                    .with_source("retry_policy"),
            ));
        }
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(Error::configuration_with_context(
                "jitter_min_ms must not exceed jitter_max_ms",
                ErrorContext::new()
                    .with_field_path("retry.jitter_min_ms")
                    .with_details(format!(
                        "{} > {}",
                        self.jitter_min_ms, self.jitter_max_ms
                    ))
                    .with_source("retry_policy"),
            ));
        }
        Ok(())
    }
}

/// Decision after a non-success attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether `outcome` deserves another attempt, given `attempt_count`
    /// attempts already made against this source in this run.
    pub fn should_retry(&self, outcome: &AttemptOutcome, attempt_count: u32) -> bool {
        if attempt_count >= self.config.max_attempts {
            return false;
        }
        is_retryable(outcome)
    }

    /// Random jitter in `[jitter_min_ms, jitter_max_ms]`.
    pub fn backoff<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let lo = self.config.jitter_min_ms;
        let hi = self.config.jitter_max_ms.max(lo);
        Duration::from_millis(rng.gen_range(lo..=hi))
    }

    pub fn decide<R: Rng + ?Sized>(
        &self,
        outcome: &AttemptOutcome,
        attempt_count: u32,
        rng: &mut R,
    ) -> RetryDecision {
        if self.should_retry(outcome, attempt_count) {
            RetryDecision::Retry {
                delay: self.backoff(rng),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

/// Retryable outcomes: timeouts, network errors, 5xx statuses, and generic
/// errors whose message encodes one of those.
pub fn is_retryable(outcome: &AttemptOutcome) -> bool {
    match outcome {
        AttemptOutcome::Timeout => true,
        AttemptOutcome::Error { cause } => match cause.reason {
            NoBidReason::Error => NoBidReason::classify(&cause.message).retryable(),
            reason => reason.retryable(),
        },
        _ => false,
    }
}
