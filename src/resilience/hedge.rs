//! Per-source latency windows used to schedule hedge attempts.

use crate::utils::keyed::{lock, KeyedState};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HedgeConfig {
    pub enabled: bool,
    /// Latency samples retained per source.
    pub window_capacity: usize,
    /// Percentile of the window used as the hedge delay.
    pub percentile: f64,
    /// Samples required before hedging a source.
    pub min_samples: usize,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_capacity: 100,
            percentile: 0.95,
            min_samples: 1,
        }
    }
}

impl HedgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_window_capacity(mut self, capacity: usize) -> Self {
        self.window_capacity = capacity;
        self
    }

    pub fn with_percentile(mut self, p: f64) -> Self {
        self.percentile = p;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let ctx = |field: &str| {
            ErrorContext::new()
                .with_field_path(format!("hedge.{}", field))
                .with_source("hedge_tracker")
        };
        if self.window_capacity == 0 {
            return Err(Error::configuration_with_context(
                "window_capacity must be > 0",
                ctx("window_capacity"),
            ));
        }
        if !(self.percentile > 0.0 && self.percentile <= 1.0) {
            return Err(Error::configuration_with_context(
                "percentile must be in (0, 1]",
                ctx("percentile").with_details(format!("got {}", self.percentile)),
            ));
        }
        Ok(())
    }
}

/// Fixed-capacity FIFO of successful latencies.
#[derive(Debug, Clone)]
struct LatencyWindow {
    samples: VecDeque<u64>,
}

impl LatencyWindow {
    fn push(&mut self, latency_ms: u64, capacity: usize) {
        while self.samples.len() >= capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    /// Nearest-rank percentile.
    fn percentile(&self, p: f64) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (p * sorted.len() as f64).ceil() as usize;
        let idx = rank.clamp(1, sorted.len()) - 1;
        Some(sorted[idx])
    }
}

/// Moving p95 latency per source.
pub struct HedgeTracker {
    cfg: HedgeConfig,
    windows: KeyedState<LatencyWindow>,
}

impl HedgeTracker {
    pub fn new(cfg: HedgeConfig) -> Self {
        Self {
            cfg,
            windows: KeyedState::new(),
        }
    }

    pub fn config(&self) -> &HedgeConfig {
        &self.cfg
    }

    /// Record a successful latency for `key`.
    pub fn record(&self, key: &str, latency_ms: u64) {
        let entry = self.windows.entry_or_insert_with(key, || LatencyWindow {
            samples: VecDeque::with_capacity(self.cfg.window_capacity),
        });
        lock(&entry).push(latency_ms, self.cfg.window_capacity.max(1));
    }

    /// Hedge delay for `key`: the configured percentile of its window, or
    /// `None` until enough history exists.
    pub fn hedge_delay(&self, key: &str) -> Option<Duration> {
        let entry = self.windows.get(key)?;
        let window = lock(&entry);
        if window.samples.len() < self.cfg.min_samples.max(1) {
            return None;
        }
        window
            .percentile(self.cfg.percentile)
            .map(Duration::from_millis)
    }

    /// Delay to hedge with under `timeout`, if hedging applies at all.
    pub fn plan(&self, key: &str, timeout: Duration) -> Option<Duration> {
        if !self.cfg.enabled {
            return None;
        }
        self.hedge_delay(key).filter(|d| *d < timeout)
    }

    pub fn sample_count(&self, key: &str) -> usize {
        self.windows
            .get(key)
            .map(|e| lock(&e).samples.len())
            .unwrap_or(0)
    }

    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    pub fn reset_all(&self) {
        self.windows.clear();
    }
}
