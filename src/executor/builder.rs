use super::core::MediationExecutor;
use crate::clock::{system_clock, Clock};
use crate::config::MediationConfig;
use crate::resilience::{CircuitBreakerBank, HedgeTracker, RetryPolicy};
use crate::routing::PriorityWeightedSelector;
use crate::telemetry::DebugSink;
use crate::tracker::PerformanceTracker;
use crate::Result;
use std::sync::Arc;

/// Builder for [`MediationExecutor`].
///
/// Keep this surface small: everything tunable lives in [`MediationConfig`].
pub struct MediationExecutorBuilder {
    config: MediationConfig,
    clock: Option<Arc<dyn Clock>>,
    debug_sink: Option<Arc<dyn DebugSink>>,
    tracker: Option<Arc<PerformanceTracker>>,
}

impl MediationExecutorBuilder {
    pub fn new() -> Self {
        Self {
            config: MediationConfig::default(),
            clock: None,
            debug_sink: None,
            tracker: None,
        }
    }

    pub fn config(mut self, config: MediationConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply `MEDIATION_*` environment overrides to the current config.
    pub fn env_overrides(mut self) -> Self {
        self.config = self.config.with_env_overrides();
        self
    }

    /// Fix the selection RNG seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.selection.seed = Some(seed);
        self
    }

    /// Clock driving breaker timing. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sink receiving one record per run. Defaults to the process-wide sink.
    pub fn debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    /// Share a performance tracker between executors.
    pub fn tracker(mut self, tracker: Arc<PerformanceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Validate the config and build the executor.
    pub fn build(self) -> Result<MediationExecutor> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(system_clock);
        let breakers = CircuitBreakerBank::new(self.config.circuit_breaker.clone(), clock.clone());
        Ok(MediationExecutor {
            tracker: self.tracker.unwrap_or_default(),
            breakers: Arc::new(breakers),
            hedges: Arc::new(HedgeTracker::new(self.config.hedge.clone())),
            selector: PriorityWeightedSelector::new(self.config.selection.clone()),
            retry: RetryPolicy::new(self.config.retry.clone()),
            clock,
            debug_sink: self.debug_sink,
            config: self.config,
        })
    }
}

impl Default for MediationExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
