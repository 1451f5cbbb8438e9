//! Deadline racing and adaptive timeout calculation.
//!
//! [`run_with_deadline`] is the single boundary where a loader future becomes an
//! [`AttemptOutcome`]: it races the future against the deadline and the run's
//! cancellation token, and turns a panic into an `Error` outcome.

use crate::error_code::NoBidReason;
use crate::tracker::SourceStats;
use crate::types::AttemptOutcome;
use crate::{Error, ErrorContext, Result};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Reason attached to outcomes of attempts abandoned by run cancellation.
pub const CANCELLED_REASON: &str = "cancelled";

/// Race `op` against `deadline` and against `parent` being cancelled.
///
/// `op` receives a child of `parent`. The child is cancelled when the deadline
/// fires or the run is cancelled, so a cooperative loader can stop early. A
/// result that is already ready is preferred over either event.
pub async fn run_with_deadline<F, Fut>(
    deadline: Duration,
    parent: &CancellationToken,
    op: F,
) -> AttemptOutcome
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    let child = parent.child_token();
    let guarded = AssertUnwindSafe(op(child.clone())).catch_unwind();
    tokio::pin!(guarded);

    // The sleep is dropped with this scope on every path.
    tokio::select! {
        biased;
        settled = &mut guarded => match settled {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(error = %message, "loader panicked");
                AttemptOutcome::error(NoBidReason::Error, format!("loader panicked: {}", message))
            }
        },
        _ = parent.cancelled() => {
            child.cancel();
            AttemptOutcome::aborted(CANCELLED_REASON)
        }
        _ = tokio::time::sleep(deadline) => {
            child.cancel();
            AttemptOutcome::Timeout
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Adaptive timeout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveTimeoutConfig {
    pub enabled: bool,
    /// Successful samples required before adapting.
    pub min_sample_size: u64,
    /// Lower bound for an adapted timeout.
    pub floor_ms: u64,
    /// Multiplier applied to the average success latency.
    pub multiplier: f64,
}

impl Default for AdaptiveTimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_sample_size: 10,
            floor_ms: 1000,
            multiplier: 2.0,
        }
    }
}

impl AdaptiveTimeoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_min_sample_size(mut self, n: u64) -> Self {
        self.min_sample_size = n;
        self
    }

    pub fn with_floor(mut self, floor: Duration) -> Self {
        self.floor_ms = floor.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
            return Err(Error::configuration_with_context(
                "multiplier must be a positive number",
                ErrorContext::new()
                    .with_field_path("adaptive_timeout.multiplier")
                    .with_details(format!("got {}", self.multiplier))
                    .with_source("adaptive_timeout"),
            ));
        }
        Ok(())
    }

    /// Effective timeout for a source configured with `configured_ms`.
    ///
    /// The result never exceeds `configured_ms`, and never drops below
    /// `floor_ms` unless the configured value already does.
    pub fn effective_timeout_ms(&self, configured_ms: u64, stats: Option<&SourceStats>) -> u64 {
        if !self.enabled {
            return configured_ms;
        }
        let avg = match stats {
            Some(s) if s.successes >= self.min_sample_size => s.avg_latency_ms(),
            _ => None,
        };
        match avg {
            Some(avg) => {
                let scaled = (avg * self.multiplier).ceil() as u64;
                configured_ms.min(scaled.max(self.floor_ms))
            }
            None => configured_ms,
        }
    }
}
