//! 执行器配置：聚合选择、熔断、重试、对冲与自适应超时设置。
//!
//! Mediation configuration.
//!
//! Every field is optional when loading from YAML or JSON; missing values take
//! the defaults of the component config. A handful of knobs can also be
//! overridden from the environment:
//! - `MEDIATION_BREAKER_FAILURE_THRESHOLD`
//! - `MEDIATION_BREAKER_WINDOW_MS`
//! - `MEDIATION_BREAKER_RECOVERY_MS`
//! - `MEDIATION_HEDGING_ENABLED` (`1`/`true` or `0`/`false`)
//! - `MEDIATION_SELECTION_SEED`

use crate::resilience::{AdaptiveTimeoutConfig, CircuitBreakerConfig, HedgeConfig, RetryConfig};
use crate::routing::SelectionConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediationConfig {
    pub selection: SelectionConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub hedge: HedgeConfig,
    pub adaptive_timeout: AdaptiveTimeoutConfig,
    /// Record attempts abandoned by run cancellation in source stats.
    pub record_aborted_attempts: bool,
}

impl MediationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection(mut self, selection: SelectionConfig) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = cfg;
        self
    }

    pub fn with_retry(mut self, cfg: RetryConfig) -> Self {
        self.retry = cfg;
        self
    }

    pub fn with_hedge(mut self, cfg: HedgeConfig) -> Self {
        self.hedge = cfg;
        self
    }

    pub fn with_adaptive_timeout(mut self, cfg: AdaptiveTimeoutConfig) -> Self {
        self.adaptive_timeout = cfg;
        self
    }

    pub fn with_record_aborted_attempts(mut self, record: bool) -> Self {
        self.record_aborted_attempts = record;
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a `.json` file, or YAML for any other extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Apply `MEDIATION_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are
    /// ignored.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = lookup("MEDIATION_BREAKER_FAILURE_THRESHOLD")
            .and_then(|v| v.trim().parse::<u32>().ok())
        {
            self.circuit_breaker.failure_threshold = v.max(1);
        }
        if let Some(v) = parse_u64("MEDIATION_BREAKER_WINDOW_MS") {
            self.circuit_breaker.time_window_ms = v.max(1);
        }
        if let Some(v) = parse_u64("MEDIATION_BREAKER_RECOVERY_MS") {
            self.circuit_breaker.recovery_time_ms = v;
        }
        if let Some(v) = lookup("MEDIATION_HEDGING_ENABLED").and_then(|v| parse_flag(&v)) {
            self.hedge.enabled = v;
        }
        if let Some(v) = parse_u64("MEDIATION_SELECTION_SEED") {
            self.selection.seed = Some(v);
        }
        debug!(config = ?self, "applied environment overrides");
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.selection.validate()?;
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.hedge.validate()?;
        self.adaptive_timeout.validate()?;
        Ok(())
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = MediationConfig::default();
        assert_eq!(cfg.circuit_breaker.failure_threshold, 3);
        assert_eq!(cfg.circuit_breaker.time_window_ms, 30_000);
        assert_eq!(cfg.circuit_breaker.recovery_time_ms, 15_000);
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.hedge.window_capacity, 100);
        assert_eq!(cfg.adaptive_timeout.floor_ms, 1000);
        assert_eq!(cfg.selection.min_sample_size, 10);
        assert!(!cfg.record_aborted_attempts);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let cfg = MediationConfig::from_yaml_str(
            r#"
circuit_breaker:
  failure_threshold: 5
hedge:
  enabled: false
selection:
  seed: 7
"#,
        )
        .unwrap();
        assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
        assert_eq!(cfg.circuit_breaker.time_window_ms, 30_000);
        assert!(!cfg.hedge.enabled);
        assert_eq!(cfg.selection.seed, Some(7));
        assert_eq!(cfg.retry, RetryConfig::default());
    }

    #[test]
    fn test_json_and_validation() {
        let cfg = MediationConfig::from_json_str(r#"{"record_aborted_attempts": true}"#).unwrap();
        assert!(cfg.record_aborted_attempts);

        let err = MediationConfig::from_json_str(r#"{"circuit_breaker": {"failure_threshold": 0}}"#)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration { .. }));

        let err = MediationConfig::from_yaml_str("retry:\n  jitter_min_ms: 200\n")
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("MEDIATION_BREAKER_FAILURE_THRESHOLD", "4"),
            ("MEDIATION_BREAKER_WINDOW_MS", "10000"),
            ("MEDIATION_BREAKER_RECOVERY_MS", "not-a-number"),
            ("MEDIATION_HEDGING_ENABLED", "0"),
            ("MEDIATION_SELECTION_SEED", "99"),
        ]
        .into_iter()
        .collect();
        let cfg = MediationConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.circuit_breaker.failure_threshold, 4);
        assert_eq!(cfg.circuit_breaker.time_window_ms, 10_000);
        assert_eq!(cfg.circuit_breaker.recovery_time_ms, 15_000);
        assert!(!cfg.hedge.enabled);
        assert_eq!(cfg.selection.seed, Some(99));
    }
}
