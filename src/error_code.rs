//! 标准无填充原因：统一的失败分类及其重试语义。
//!
//! Standard no-bid reason taxonomy.
//!
//! Every attempt that does not produce a usable ad is tagged with one of these
//! reasons. The names are stable strings so analytics and the mediation
//! debugger can group failures across ad networks.
//!
//! | Reason          | Name            | Retryable |
//! |-----------------|-----------------|-----------|
//! | `Timeout`       | `timeout`       | yes       |
//! | `NetworkError`  | `network_error` | yes       |
//! | `Status(5xx)`   | `status_5xx`    | yes       |
//! | `Status(other)` | `status_XXX`    | no        |
//! | `NoFill`        | `no_fill`       | no        |
//! | `BelowFloor`    | `below_floor`   | no        |
//! | `CircuitOpen`   | `circuit_open`  | no        |
//! | `Cancelled`     | `cancelled`     | no        |
//! | `Error`         | `error`         | no        |
//!
//! ## Example
//!
//! ```rust
//! use byo_mediation::error_code::NoBidReason;
//!
//! let reason = NoBidReason::classify("upstream returned status_503");
//! assert_eq!(reason, NoBidReason::Status(503));
//! assert!(reason.retryable());
//! assert_eq!(reason.name(), "status_503");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

static STATUS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bstatus_(\d{3})\b").expect("status pattern is a valid regex")
});

/// Normalized reason an attempt produced no usable ad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoBidReason {
    /// The attempt exceeded its deadline.
    Timeout,
    /// Connection-level failure before a response was received.
    NetworkError,
    /// The network answered with an HTTP-like status code.
    Status(u16),
    /// The network had nothing to serve.
    NoFill,
    /// A bid was returned but below the source's minimum bid.
    BelowFloor,
    /// The source was skipped because its breaker is open.
    CircuitOpen,
    /// The caller cancelled the request.
    Cancelled,
    /// Unclassified failure.
    Error,
}

impl NoBidReason {
    /// Returns the canonical reason name (e.g., `"timeout"`, `"status_503"`).
    pub fn name(&self) -> String {
        match self {
            Self::Status(code) => format!("status_{}", code),
            other => other.static_name().to_string(),
        }
    }

    fn static_name(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::Status(_) => "status",
            Self::NoFill => "no_fill",
            Self::BelowFloor => "below_floor",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    /// Returns whether a failure with this reason is worth one more attempt.
    ///
    /// The allow-list is intentionally narrow: only transport-level and
    /// server-side transient failures qualify.
    #[inline]
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::NetworkError => true,
            Self::Status(code) => (500..=599).contains(code),
            _ => false,
        }
    }

    /// Returns whether this reason counts against the source's circuit breaker.
    ///
    /// No-fills and floor rejections are healthy answers from the network.
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::NetworkError | Self::Status(_) | Self::Error
        )
    }

    /// Maps a reason name back to a `NoBidReason`.
    pub fn from_name(name: &str) -> Option<Self> {
        let reason = match name {
            "timeout" => Self::Timeout,
            "network_error" => Self::NetworkError,
            "no_fill" => Self::NoFill,
            "below_floor" => Self::BelowFloor,
            "circuit_open" => Self::CircuitOpen,
            "cancelled" => Self::Cancelled,
            "error" => Self::Error,
            other => {
                let code = other.strip_prefix("status_")?.parse::<u16>().ok()?;
                Self::Status(code)
            }
        };
        Some(reason)
    }

    /// Classifies a free-form error detail string.
    ///
    /// Recognizes encoded statuses (`status_503`), and the timeout and network
    /// wording adapters commonly surface. Anything else is [`NoBidReason::Error`].
    pub fn classify(detail: &str) -> Self {
        if let Some(code) = STATUS_PATTERN
            .captures(detail)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
        {
            return Self::Status(code);
        }
        let lower = detail.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            Self::Timeout
        } else if lower.contains("network") || lower.contains("connection") {
            Self::NetworkError
        } else if lower == "no_fill" || lower.contains("no fill") {
            Self::NoFill
        } else {
            Self::Error
        }
    }
}

impl fmt::Display for NoBidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "status_{}", code),
            other => f.write_str(other.static_name()),
        }
    }
}

impl Serialize for NoBidReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for NoBidReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        NoBidReason::from_name(&name).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown no-bid reason '{}'", name))
        })
    }
}
