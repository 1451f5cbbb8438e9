//! Dispatch targets consumed from the source registry.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default per-attempt timeout when none is configured.
pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 5_000;

/// A single ad source (demand partner) the engine may dispatch to.
///
/// Sources are immutable once built. A config refresh replaces the whole list
/// (see [`SourceRegistry`](crate::registry::SourceRegistry)) rather than
/// mutating sources in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SourceSpec", into = "SourceSpec")]
pub struct Source {
    id: String,
    priority: u32,
    weight: f64,
    timeout_ms: u64,
    enabled: bool,
    min_bid: f64,
    metadata: HashMap<String, String>,
}

impl Source {
    /// Start building a source with the given id.
    pub fn builder(id: impl Into<String>) -> SourceBuilder {
        SourceBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Priority tier; `0` is tried first.
    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn min_bid(&self) -> f64 {
        self.min_bid
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Partner identifier used for breaker keys.
    ///
    /// Several sources can front the same network account; the `partner_id`
    /// metadata entry groups them. Falls back to the source id.
    pub fn partner_id(&self) -> &str {
        self.metadata
            .get("partner_id")
            .map(|s| s.as_str())
            .unwrap_or(&self.id)
    }
}

/// Validating builder for [`Source`].
#[derive(Debug, Clone)]
pub struct SourceBuilder {
    id: String,
    priority: i64,
    weight: f64,
    timeout_ms: u64,
    enabled: bool,
    min_bid: f64,
    metadata: HashMap<String, String>,
}

impl SourceBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            weight: 1.0,
            timeout_ms: DEFAULT_SOURCE_TIMEOUT_MS,
            enabled: true,
            min_bid: 0.0,
            metadata: HashMap::new(),
        }
    }

    /// Set the priority tier. Accepts signed input so external values can be
    /// rejected by [`build`](Self::build) instead of silently wrapping.
    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn min_bid(mut self, min_bid: f64) -> Self {
        self.min_bid = min_bid;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validate and build the source.
    pub fn build(self) -> Result<Source> {
        let ctx = |field: &str| {
            ErrorContext::new()
                .with_field_path(format!("source.{}", field))
                .with_source("source_builder")
        };

        if self.id.trim().is_empty() {
            return Err(Error::validation_with_context(
                "source id must not be empty",
                ctx("id"),
            ));
        }
        if self.priority < 0 || self.priority > u32::MAX as i64 {
            return Err(Error::validation_with_context(
                format!("priority must be >= 0 for source '{}'", self.id),
                ctx("priority").with_details(format!("got {}", self.priority)),
            ));
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(Error::validation_with_context(
                format!("weight must be > 0 for source '{}'", self.id),
                ctx("weight").with_details(format!("got {}", self.weight)),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::validation_with_context(
                format!("timeout_ms must be > 0 for source '{}'", self.id),
                ctx("timeout_ms"),
            ));
        }
        if !self.min_bid.is_finite() || self.min_bid < 0.0 {
            return Err(Error::validation_with_context(
                format!("min_bid must be a non-negative number for source '{}'", self.id),
                ctx("min_bid").with_details(format!("got {}", self.min_bid)),
            ));
        }

        Ok(Source {
            id: self.id,
            priority: self.priority as u32,
            weight: self.weight,
            timeout_ms: self.timeout_ms,
            enabled: self.enabled,
            min_bid: self.min_bid,
            metadata: self.metadata,
        })
    }
}

/// Wire shape of a source record, as produced by the external config loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub min_bid: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_timeout_ms() -> u64 {
    DEFAULT_SOURCE_TIMEOUT_MS
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<SourceSpec> for Source {
    type Error = Error;

    fn try_from(spec: SourceSpec) -> Result<Self> {
        let mut builder = SourceBuilder::new(spec.id)
            .priority(spec.priority)
            .weight(spec.weight)
            .timeout_ms(spec.timeout_ms)
            .enabled(spec.enabled)
            .min_bid(spec.min_bid);
        builder.metadata = spec.metadata;
        builder.build()
    }
}

impl From<Source> for SourceSpec {
    fn from(s: Source) -> Self {
        Self {
            id: s.id,
            priority: s.priority as i64,
            weight: s.weight,
            timeout_ms: s.timeout_ms,
            enabled: s.enabled,
            min_bid: s.min_bid,
            metadata: s.metadata,
        }
    }
}
