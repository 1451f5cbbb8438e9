//! Per-attempt outcomes.

use crate::error_code::NoBidReason;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure cause carried by [`AttemptOutcome::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    pub reason: NoBidReason,
    pub message: String,
}

impl AttemptError {
    pub fn new(reason: NoBidReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

/// Result of exactly one attempt against one source.
///
/// Outcomes are never retried in place; a retry produces a new outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { latency_ms: u64, bid: f64 },
    NoFill { reason: String },
    Error { cause: AttemptError },
    Timeout,
    CircuitOpen,
    Aborted { reason: String },
}

/// Discriminant of [`AttemptOutcome`], used in attempt details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Success,
    NoFill,
    Error,
    Timeout,
    CircuitOpen,
    Aborted,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoFill => "no_fill",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AttemptOutcome {
    pub fn no_fill(reason: impl Into<String>) -> Self {
        Self::NoFill {
            reason: reason.into(),
        }
    }

    pub fn error(reason: NoBidReason, message: impl Into<String>) -> Self {
        Self::Error {
            cause: AttemptError::new(reason, message),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Success { .. } => ResultKind::Success,
            Self::NoFill { .. } => ResultKind::NoFill,
            Self::Error { .. } => ResultKind::Error,
            Self::Timeout => ResultKind::Timeout,
            Self::CircuitOpen => ResultKind::CircuitOpen,
            Self::Aborted { .. } => ResultKind::Aborted,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Normalized no-bid reason, `None` for successes.
    pub fn no_bid_reason(&self) -> Option<NoBidReason> {
        match self {
            Self::Success { .. } => None,
            Self::NoFill { reason } => Some(
                NoBidReason::from_name(reason)
                    .filter(|r| matches!(r, NoBidReason::BelowFloor))
                    .unwrap_or(NoBidReason::NoFill),
            ),
            Self::Error { cause } => Some(cause.reason),
            Self::Timeout => Some(NoBidReason::Timeout),
            Self::CircuitOpen => Some(NoBidReason::CircuitOpen),
            Self::Aborted { .. } => Some(NoBidReason::Cancelled),
        }
    }

    /// Human-readable detail for diagnostics.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Success { .. } | Self::Timeout | Self::CircuitOpen => None,
            Self::NoFill { reason } | Self::Aborted { reason } => Some(reason.clone()),
            Self::Error { cause } => Some(cause.to_string()),
        }
    }

    /// Whether this outcome counts as a failure for the circuit breaker.
    pub fn is_breaker_failure(&self) -> bool {
        self.no_bid_reason().map(|r| r.is_failure()).unwrap_or(false)
    }
}
