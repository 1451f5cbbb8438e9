//! 来源选择：按优先级分组，组内按（可选性能调整的）权重随机抽取。
//!
//! Priority-weighted source selection.
//!
//! This module is pure logic: it never invokes a loader. The executor asks it
//! for the priority groups of a run and then draws sources one at a time from
//! the current group. Each draw removes the source from the pool, so a source
//! is attempted at most once per group per run.
//!
//! Design notes:
//! - Groups are visited strictly in ascending priority (0 first).
//! - With performance weighting on, a source's weight is scaled by
//!   `0.5 + fill_rate` once it has enough samples, and floored at
//!   `min_effective_weight` so a cold streak never starves it completely.
//! - The random source is a seedable `StdRng`, so runs are reproducible.

use crate::tracker::PerformanceTracker;
use crate::types::{AttemptOutcome, Source};
use crate::{Error, ErrorContext, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Weighted selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Adjust weights by observed fill rate.
    pub performance_weighting: bool,
    /// Attempts a source needs before its fill rate is trusted.
    pub min_sample_size: u64,
    pub min_effective_weight: f64,
    /// Fixed RNG seed; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            performance_weighting: true,
            min_sample_size: 10,
            min_effective_weight: 0.1,
            seed: None,
        }
    }
}

impl SelectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_performance_weighting(mut self, enabled: bool) -> Self {
        self.performance_weighting = enabled;
        self
    }

    pub fn with_min_sample_size(mut self, n: u64) -> Self {
        self.min_sample_size = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_effective_weight.is_finite() && self.min_effective_weight > 0.0) {
            return Err(Error::configuration_with_context(
                "min_effective_weight must be a positive number",
                ErrorContext::new()
                    .with_field_path("selection.min_effective_weight")
                    .with_details(format!("got {}", self.min_effective_weight))
                    .with_source("selector"),
            ));
        }
        Ok(())
    }
}

/// Enabled sources sharing one priority.
#[derive(Debug, Clone)]
pub struct PriorityGroup {
    pub priority: u32,
    pub sources: Vec<Source>,
}

/// Drop disabled sources and group the rest by ascending priority.
///
/// Sources keep their input order inside a group.
pub fn group_by_priority(sources: &[Source]) -> Vec<PriorityGroup> {
    let mut groups: BTreeMap<u32, Vec<Source>> = BTreeMap::new();
    for source in sources.iter().filter(|s| s.enabled()) {
        groups
            .entry(source.priority())
            .or_default()
            .push(source.clone());
    }
    groups
        .into_iter()
        .map(|(priority, sources)| PriorityGroup { priority, sources })
        .collect()
}

/// Index picked by walking `weights` with `r` drawn from `[0, total)`.
fn pick_index(weights: &[f64], mut r: f64) -> usize {
    for (i, w) in weights.iter().enumerate() {
        r -= w;
        if r <= 0.0 {
            return i;
        }
    }
    // Float rounding can leave a sliver past the last weight.
    weights.len() - 1
}

/// Weighted random draw without replacement.
pub struct PriorityWeightedSelector {
    cfg: SelectionConfig,
    rng: Mutex<StdRng>,
}

impl PriorityWeightedSelector {
    pub fn new(cfg: SelectionConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            cfg,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.cfg
    }

    /// Weight used for `source` in the next draw.
    pub fn effective_weight(&self, source: &Source, tracker: &PerformanceTracker) -> f64 {
        if !self.cfg.performance_weighting {
            return source.weight();
        }
        match tracker.get(source.id()) {
            Some(stats) if stats.attempts >= self.cfg.min_sample_size => {
                let adjusted = source.weight() * (0.5 + stats.fill_rate());
                adjusted.max(self.cfg.min_effective_weight)
            }
            _ => source.weight(),
        }
    }

    /// Draw one source and remove it from `pool`.
    pub fn draw(&self, pool: &mut Vec<Source>, tracker: &PerformanceTracker) -> Option<Source> {
        if pool.is_empty() {
            return None;
        }
        let weights: Vec<f64> = pool
            .iter()
            .map(|s| self.effective_weight(s, tracker))
            .collect();
        let total: f64 = weights.iter().sum();

        let idx = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            if total > 0.0 && total.is_finite() {
                pick_index(&weights, rng.gen::<f64>() * total)
            } else {
                rng.gen_range(0..pool.len())
            }
        };
        let source = pool.remove(idx);
        debug!(
            source_id = source.id(),
            priority = source.priority(),
            weight = weights[idx],
            total_weight = total,
            remaining = pool.len(),
            "drew source"
        );
        Some(source)
    }

    /// Full draw order of one group, as the executor would visit it.
    pub fn order(&self, group: &PriorityGroup, tracker: &PerformanceTracker) -> Vec<Source> {
        let mut pool = group.sources.clone();
        let mut ordered = Vec::with_capacity(pool.len());
        while let Some(s) = self.draw(&mut pool, tracker) {
            ordered.push(s);
        }
        ordered
    }
}

/// Outcome reported when every group is exhausted without a fill.
///
/// A trailing timeout, error or open circuit is surfaced as-is; anything else
/// collapses to `NoFill`.
pub fn final_outcome(last: Option<&AttemptOutcome>) -> AttemptOutcome {
    match last {
        Some(o @ (AttemptOutcome::Timeout | AttemptOutcome::Error { .. } | AttemptOutcome::CircuitOpen)) => {
            o.clone()
        }
        _ => AttemptOutcome::no_fill("no_fill"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::NoBidReason;

    fn src(id: &str, priority: i64, weight: f64) -> Source {
        Source::builder(id)
            .priority(priority)
            .weight(weight)
            .build()
            .unwrap()
    }

    #[test]
    fn test_group_by_priority_filters_and_orders() {
        let disabled = Source::builder("off").priority(0).enabled(false).build().unwrap();
        let groups = group_by_priority(&[
            src("c", 2, 1.0),
            src("a", 0, 1.0),
            disabled,
            src("b", 0, 1.0),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].priority, 0);
        let ids: Vec<&str> = groups[0].sources.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(groups[1].priority, 2);
    }

    #[test]
    fn test_pick_index_walk() {
        let w = [1.0, 1.0, 8.0];
        assert_eq!(pick_index(&w, 0.0), 0);
        assert_eq!(pick_index(&w, 0.5), 0);
        assert_eq!(pick_index(&w, 1.5), 1);
        assert_eq!(pick_index(&w, 2.5), 2);
        assert_eq!(pick_index(&w, 9.999), 2);
        assert_eq!(pick_index(&w, 10.5), 2);
    }

    #[test]
    fn test_draw_without_replacement() {
        let sel = PriorityWeightedSelector::new(SelectionConfig::new().with_seed(3));
        let tracker = PerformanceTracker::new();
        let mut pool = vec![src("a", 0, 1.0), src("b", 0, 2.0), src("c", 0, 3.0)];
        let mut seen = Vec::new();
        while let Some(s) = sel.draw(&mut pool, &tracker) {
            seen.push(s.id().to_string());
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(sel.draw(&mut pool, &tracker).is_none());
    }

    #[test]
    fn test_heavy_weight_drawn_first_most_often() {
        let sel = PriorityWeightedSelector::new(
            SelectionConfig::new()
                .with_performance_weighting(false)
                .with_seed(42),
        );
        let tracker = PerformanceTracker::new();
        let group = PriorityGroup {
            priority: 0,
            sources: vec![src("a", 0, 1.0), src("b", 0, 1.0), src("heavy", 0, 8.0)],
        };
        let mut heavy_first = 0;
        for _ in 0..1000 {
            if sel.order(&group, &tracker)[0].id() == "heavy" {
                heavy_first += 1;
            }
        }
        assert!(heavy_first > 700, "heavy first {} / 1000", heavy_first);
    }

    #[test]
    fn test_effective_weight_uses_fill_rate_after_min_samples() {
        let sel = PriorityWeightedSelector::new(SelectionConfig::default());
        let tracker = PerformanceTracker::new();
        let s = src("a", 0, 2.0);

        for _ in 0..9 {
            tracker.record("a", &AttemptOutcome::no_fill("no_fill"));
        }
        assert_eq!(sel.effective_weight(&s, &tracker), 2.0);

        tracker.record("a", &AttemptOutcome::no_fill("no_fill"));
        // 2.0 * (0.5 + 0.0)
        assert!((sel.effective_weight(&s, &tracker) - 1.0).abs() < 1e-9);

        let low = src("low", 0, 0.1);
        for _ in 0..10 {
            tracker.record("low", &AttemptOutcome::no_fill("no_fill"));
        }
        assert!((sel.effective_weight(&low, &tracker) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_effective_weight_ignores_stats_when_disabled() {
        let sel = PriorityWeightedSelector::new(
            SelectionConfig::new().with_performance_weighting(false),
        );
        let tracker = PerformanceTracker::new();
        for _ in 0..20 {
            tracker.record(
                "a",
                &AttemptOutcome::Success {
                    latency_ms: 10,
                    bid: 1.0,
                },
            );
        }
        assert_eq!(sel.effective_weight(&src("a", 0, 3.0), &tracker), 3.0);
    }

    #[test]
    fn test_same_seed_same_order() {
        let tracker = PerformanceTracker::new();
        let group = PriorityGroup {
            priority: 0,
            sources: (0..6).map(|i| src(&format!("s{}", i), 0, 1.0 + i as f64)).collect(),
        };
        let a = PriorityWeightedSelector::new(SelectionConfig::new().with_seed(9));
        let b = PriorityWeightedSelector::new(SelectionConfig::new().with_seed(9));
        for _ in 0..10 {
            let oa: Vec<String> = a.order(&group, &tracker).iter().map(|s| s.id().to_string()).collect();
            let ob: Vec<String> = b.order(&group, &tracker).iter().map(|s| s.id().to_string()).collect();
            assert_eq!(oa, ob);
        }
    }

    #[test]
    fn test_final_outcome() {
        assert_eq!(final_outcome(None), AttemptOutcome::no_fill("no_fill"));
        assert_eq!(
            final_outcome(Some(&AttemptOutcome::no_fill("below_floor"))),
            AttemptOutcome::no_fill("no_fill")
        );
        assert_eq!(
            final_outcome(Some(&AttemptOutcome::Timeout)),
            AttemptOutcome::Timeout
        );
        assert_eq!(
            final_outcome(Some(&AttemptOutcome::CircuitOpen)),
            AttemptOutcome::CircuitOpen
        );
        let err = AttemptOutcome::error(NoBidReason::Status(500), "status_500");
        assert_eq!(final_outcome(Some(&err)), err);
        assert_eq!(
            final_outcome(Some(&AttemptOutcome::aborted("cancelled"))),
            AttemptOutcome::no_fill("no_fill")
        );
    }
}
