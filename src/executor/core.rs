use super::attempt::run_attempt;
use super::state::{ExecutionPhase, RunState};
use crate::clock::Clock;
use crate::config::MediationConfig;
use crate::loader::AdLoader;
use crate::registry::SourceRegistry;
use crate::resilience::timeout::CANCELLED_REASON;
use crate::resilience::{
    CircuitBreakerBank, CircuitBreakerSnapshot, HedgeTracker, RetryDecision, RetryPolicy,
};
use crate::routing::{final_outcome, group_by_priority, PriorityWeightedSelector};
use crate::telemetry::{DebugRecord, DebugSink};
use crate::tracker::{PerformanceTracker, SourceStats};
use crate::types::{AttemptOutcome, ExecutionResult, Source};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Placement used by [`MediationExecutor::execute`].
pub const DEFAULT_PLACEMENT: &str = "default";

/// Reason recorded when a fill is rejected by the source's minimum bid.
pub const BELOW_FLOOR_REASON: &str = "below_floor";

/// Client-side mediation executor.
///
/// One executor owns the shared state of a session: source stats, breakers,
/// hedge windows and the selection RNG. It is `Send + Sync`; wrap it in an
/// `Arc` to run placements concurrently.
pub struct MediationExecutor {
    pub(crate) config: MediationConfig,
    pub(crate) tracker: Arc<PerformanceTracker>,
    pub(crate) breakers: Arc<CircuitBreakerBank>,
    pub(crate) hedges: Arc<HedgeTracker>,
    pub(crate) selector: PriorityWeightedSelector,
    pub(crate) retry: RetryPolicy,
    pub(crate) clock: Arc<dyn Clock>,
    /// `None` reports to the process-wide sink.
    pub(crate) debug_sink: Option<Arc<dyn DebugSink>>,
}

/// How a source's attempts ended.
enum SourceEnd {
    Filled(AttemptOutcome),
    Exhausted,
    Aborted,
}

impl MediationExecutor {
    pub fn builder() -> super::MediationExecutorBuilder {
        super::MediationExecutorBuilder::new()
    }

    pub fn config(&self) -> &MediationConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Mediate on the default placement.
    pub async fn execute<L>(
        &self,
        sources: &[Source],
        loader: &L,
        cancel: Option<&CancellationToken>,
    ) -> ExecutionResult
    where
        L: AdLoader + ?Sized,
    {
        self.execute_placement(DEFAULT_PLACEMENT, sources, loader, cancel)
            .await
    }

    /// Mediate on the current snapshot of `registry`.
    pub async fn execute_registry<L>(
        &self,
        placement_id: &str,
        registry: &SourceRegistry,
        loader: &L,
        cancel: Option<&CancellationToken>,
    ) -> ExecutionResult
    where
        L: AdLoader + ?Sized,
    {
        let sources = registry.snapshot();
        self.execute_placement(placement_id, &sources, loader, cancel)
            .await
    }

    /// Run the priority waterfall for one placement.
    ///
    /// Never fails: every problem is reported through the result's outcome
    /// and attempt details.
    pub async fn execute_placement<L>(
        &self,
        placement_id: &str,
        sources: &[Source],
        loader: &L,
        cancel: Option<&CancellationToken>,
    ) -> ExecutionResult
    where
        L: AdLoader + ?Sized,
    {
        let cancel = cancel.cloned().unwrap_or_else(CancellationToken::new);
        let mut run = RunState::new(placement_id);
        let outcome = self
            .run_waterfall(placement_id, sources, loader, &cancel, &mut run)
            .await;
        run.transition(ExecutionPhase::Done);

        let source_id = run.last_source.take();
        let result = ExecutionResult {
            outcome,
            source_id,
            attempts_count: run.details.len(),
            total_duration_ms: run.elapsed().as_millis() as u64,
            attempt_details: std::mem::take(&mut run.details),
        };

        info!(
            placement_id,
            outcome = %result.outcome.kind(),
            source_id = result.source_id.as_deref().unwrap_or("-"),
            attempts = result.attempts_count,
            duration_ms = result.total_duration_ms,
            "mediation completed"
        );
        self.report(placement_id, &result).await;
        result
    }

    async fn run_waterfall<L>(
        &self,
        placement_id: &str,
        sources: &[Source],
        loader: &L,
        cancel: &CancellationToken,
        run: &mut RunState,
    ) -> AttemptOutcome
    where
        L: AdLoader + ?Sized,
    {
        if cancel.is_cancelled() {
            debug!(placement_id, "cancelled before first attempt");
            return AttemptOutcome::aborted(CANCELLED_REASON);
        }

        for group in group_by_priority(sources) {
            run.transition(ExecutionPhase::SelectingGroup);
            debug!(
                placement_id,
                priority = group.priority,
                sources = group.sources.len(),
                "entering priority group"
            );
            let mut pool = group.sources;
            loop {
                if cancel.is_cancelled() {
                    return AttemptOutcome::aborted(CANCELLED_REASON);
                }
                let Some(source) = self.selector.draw(&mut pool, &self.tracker) else {
                    break;
                };

                let key = CircuitBreakerBank::key(source.partner_id(), placement_id);
                if self.breakers.is_open(&key) {
                    debug!(placement_id, source_id = source.id(), "circuit open, skipping");
                    run.push_detail(
                        &source,
                        Instant::now(),
                        &AttemptOutcome::CircuitOpen,
                        false,
                        false,
                        0,
                    );
                    continue;
                }

                run.transition(ExecutionPhase::Attempting);
                match self.attempt_source(&source, &key, loader, cancel, run).await {
                    SourceEnd::Filled(outcome) => {
                        run.transition(ExecutionPhase::Success);
                        return outcome;
                    }
                    SourceEnd::Aborted => return AttemptOutcome::aborted(CANCELLED_REASON),
                    SourceEnd::Exhausted => {}
                }
            }
            run.transition(ExecutionPhase::GroupExhausted);
        }

        final_outcome(run.last_outcome.as_ref())
    }

    /// All attempts against one source: the first call plus at most the
    /// retries the policy allows.
    async fn attempt_source<L>(
        &self,
        source: &Source,
        breaker_key: &str,
        loader: &L,
        cancel: &CancellationToken,
        run: &mut RunState,
    ) -> SourceEnd
    where
        L: AdLoader + ?Sized,
    {
        let stats = self.tracker.get(source.id());
        let timeout_ms = self
            .config
            .adaptive_timeout
            .effective_timeout_ms(source.timeout_ms(), stats.as_ref());
        let timeout = Duration::from_millis(timeout_ms);

        let mut attempt: u32 = 1;
        loop {
            let hedge_delay = self.hedges.plan(source.id(), timeout);
            let started = Instant::now();
            let report = run_attempt(loader, source, timeout, hedge_delay, cancel, run).await;
            let outcome = apply_floor(report.outcome, source.min_bid());

            debug!(
                source_id = source.id(),
                priority = source.priority(),
                attempt,
                duration_ms = started.elapsed().as_millis() as u64,
                outcome = %outcome.kind(),
                hedged = report.hedged,
                "attempt finished"
            );

            if let AttemptOutcome::Aborted { .. } = outcome {
                if self.config.record_aborted_attempts {
                    self.tracker.record(source.id(), &outcome);
                }
                run.push_detail(source, started, &outcome, attempt > 1, report.hedged, timeout_ms);
                return SourceEnd::Aborted;
            }

            self.tracker.record(source.id(), &outcome);
            run.push_detail(source, started, &outcome, attempt > 1, report.hedged, timeout_ms);

            if let AttemptOutcome::Success { latency_ms, .. } = outcome {
                self.hedges.record(source.id(), latency_ms);
                self.breakers.record_success(breaker_key);
                return SourceEnd::Filled(outcome);
            }

            let decision = self.retry.decide(&outcome, attempt, &mut rand::thread_rng());
            if let RetryDecision::Retry { delay } = decision {
                run.transition(ExecutionPhase::Retrying);
                debug!(
                    source_id = source.id(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying after jitter"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        // The failed attempt already completed; it still counts.
                        if outcome.is_breaker_failure() {
                            self.breakers.record_failure(breaker_key);
                        }
                        return SourceEnd::Aborted;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
                run.transition(ExecutionPhase::Attempting);
                continue;
            }

            if outcome.is_breaker_failure() {
                self.breakers.record_failure(breaker_key);
            }
            return SourceEnd::Exhausted;
        }
    }

    async fn report(&self, placement_id: &str, result: &ExecutionResult) {
        let sink = match &self.debug_sink {
            Some(s) => s.clone(),
            None => crate::telemetry::get_debug_sink(),
        };
        if let Err(e) = sink
            .report(DebugRecord::new(placement_id, result.clone()))
            .await
        {
            warn!(placement_id, error = %e, "debug sink rejected record");
        }
    }

    /// Stats of every source seen so far.
    pub fn performance_stats(&self) -> HashMap<String, SourceStats> {
        self.tracker.all()
    }

    pub fn source_performance(&self, source_id: &str) -> Option<SourceStats> {
        self.tracker.get(source_id)
    }

    /// Forget a source's stats and latency window. Breakers are kept; see
    /// [`reset_breaker`](Self::reset_breaker).
    pub fn reset_stats(&self, source_id: &str) {
        self.tracker.reset(source_id);
        self.hedges.reset(source_id);
    }

    pub fn reset_all_stats(&self) {
        self.tracker.reset_all();
        self.hedges.reset_all();
    }

    /// Breaker state of `source` on `placement_id`.
    pub fn breaker_snapshot(&self, source: &Source, placement_id: &str) -> CircuitBreakerSnapshot {
        self.breakers
            .snapshot(&CircuitBreakerBank::key(source.partner_id(), placement_id))
    }

    /// Every breaker created so far.
    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut keys = self.breakers.keys();
        keys.sort();
        keys.iter().map(|k| self.breakers.snapshot(k)).collect()
    }

    /// Close the breaker for `key` (`partner:placement`) and clear its history.
    pub fn reset_breaker(&self, key: &str) {
        self.breakers.reset(key);
    }

    /// Current hedge delay for a source, if it has latency history.
    pub fn hedge_delay(&self, source_id: &str) -> Option<Duration> {
        self.hedges.hedge_delay(source_id)
    }
}

/// Turn a fill below the source's floor into a no-fill.
fn apply_floor(outcome: AttemptOutcome, min_bid: f64) -> AttemptOutcome {
    match outcome {
        AttemptOutcome::Success { bid, .. } if bid < min_bid => {
            AttemptOutcome::no_fill(BELOW_FLOOR_REASON)
        }
        other => other,
    }
}
