//! 来源性能统计：按来源累积的尝试结果计数与延迟/出价历史。
//!
//! Per-source performance tracking.
//!
//! Counters are created lazily on a source's first recorded attempt and live
//! until explicitly reset. Writes come from the executor right after each
//! attempt; the selector and the adaptive timeout read concurrently.

use crate::clock::unix_ms;
use crate::types::AttemptOutcome;
use crate::utils::keyed::{lock, KeyedState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Accumulated outcome counters for one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub attempts: u64,
    pub successes: u64,
    pub no_fills: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub total_latency_ms: u64,
    pub total_bid_micros: u64,
    pub last_success_at_ms: Option<u64>,
}

impl SourceStats {
    /// Successes over attempts; `0.0` before any attempt.
    pub fn fill_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    /// Mean latency of successful attempts.
    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.successes == 0 {
            None
        } else {
            Some(self.total_latency_ms as f64 / self.successes as f64)
        }
    }

    /// Mean winning bid.
    pub fn avg_bid(&self) -> Option<f64> {
        if self.successes == 0 {
            None
        } else {
            Some(self.total_bid_micros as f64 / self.successes as f64 / 1_000_000.0)
        }
    }

    fn apply(&mut self, outcome: &AttemptOutcome, now_ms: u64) {
        match outcome {
            AttemptOutcome::CircuitOpen => return,
            AttemptOutcome::Success { latency_ms, bid } => {
                self.successes += 1;
                self.total_latency_ms = self.total_latency_ms.saturating_add(*latency_ms);
                self.total_bid_micros = self
                    .total_bid_micros
                    .saturating_add(bid_to_micros(*bid));
                self.last_success_at_ms = Some(now_ms);
            }
            AttemptOutcome::NoFill { .. } => self.no_fills += 1,
            AttemptOutcome::Error { .. } => self.errors += 1,
            AttemptOutcome::Timeout => self.timeouts += 1,
            AttemptOutcome::Aborted { .. } => {}
        }
        self.attempts += 1;
    }
}

fn bid_to_micros(bid: f64) -> u64 {
    if bid.is_finite() && bid > 0.0 {
        (bid * 1_000_000.0).round() as u64
    } else {
        0
    }
}

/// Shared, per-key locked store of [`SourceStats`].
#[derive(Default)]
pub struct PerformanceTracker {
    stats: KeyedState<SourceStats>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt outcome. `CircuitOpen` is ignored: the source was
    /// never invoked.
    pub fn record(&self, source_id: &str, outcome: &AttemptOutcome) {
        if matches!(outcome, AttemptOutcome::CircuitOpen) {
            return;
        }
        let entry = self
            .stats
            .entry_or_insert_with(source_id, SourceStats::default);
        lock(&entry).apply(outcome, unix_ms());
    }

    /// Snapshot for one source.
    pub fn get(&self, source_id: &str) -> Option<SourceStats> {
        self.stats.get(source_id).map(|e| lock(&e).clone())
    }

    /// Snapshot of every tracked source.
    pub fn all(&self) -> HashMap<String, SourceStats> {
        self.stats.snapshot_all()
    }

    /// Number of recorded attempts, `0` for unknown sources.
    pub fn sample_count(&self, source_id: &str) -> u64 {
        self.stats
            .get(source_id)
            .map(|e| lock(&e).attempts)
            .unwrap_or(0)
    }

    pub fn reset(&self, source_id: &str) {
        self.stats.remove(source_id);
    }

    pub fn reset_all(&self) {
        self.stats.clear();
    }
}
