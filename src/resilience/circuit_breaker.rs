use crate::clock::Clock;
use crate::utils::keyed::{lock, KeyedState};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub key: String,
    pub state: BreakerState,
    pub failure_threshold: u32,
    /// Failures currently inside the sliding window.
    pub failures_in_window: usize,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub time_window_ms: u64,
    pub recovery_time_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            time_window_ms: 30_000,
            recovery_time_ms: 15_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the sliding window failures are counted in
    pub fn with_time_window(mut self, window: Duration) -> Self {
        self.time_window_ms = window.as_millis() as u64;
        self
    }

    /// Set how long the breaker stays open before probing
    pub fn with_recovery_time(mut self, recovery: Duration) -> Self {
        self.recovery_time_ms = recovery.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let ctx = |field: &str| {
            ErrorContext::new()
                .with_field_path(format!("circuit_breaker.{}", field))
                .with_source("circuit_breaker")
        };
        if self.failure_threshold == 0 {
            return Err(Error::configuration_with_context(
                "failure_threshold must be >= 1",
                ctx("failure_threshold"),
            ));
        }
        if self.time_window_ms == 0 {
            return Err(Error::configuration_with_context(
                "time_window_ms must be > 0",
                ctx("time_window_ms"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct State {
    state: BreakerState,
    /// Failure timestamps inside the window, oldest first.
    failures: VecDeque<u64>,
    opened_at: Option<u64>,
}

impl State {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
        }
    }

    /// Open -> HalfOpen once the recovery time has elapsed.
    fn refresh(&mut self, cfg: &CircuitBreakerConfig, now: u64) -> BreakerState {
        if self.state == BreakerState::Open {
            let opened_at = self.opened_at.unwrap_or(now);
            if now.saturating_sub(opened_at) >= cfg.recovery_time_ms {
                self.state = BreakerState::HalfOpen;
            }
        }
        self.state
    }

    fn prune(&mut self, cfg: &CircuitBreakerConfig, now: u64) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_sub(oldest) >= cfg.time_window_ms {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_window(&self, cfg: &CircuitBreakerConfig, now: u64) -> usize {
        self.failures
            .iter()
            .filter(|&&ts| now.saturating_sub(ts) < cfg.time_window_ms)
            .count()
    }
}

/// Bank of sliding-window circuit breakers keyed by `partner:placement`.
///
/// - Entries are created lazily and never removed implicitly
/// - State transitions are evaluated on read, there is no background timer
/// - Each key has its own lock
pub struct CircuitBreakerBank {
    cfg: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: KeyedState<State>,
}

impl CircuitBreakerBank {
    pub fn new(cfg: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            breakers: KeyedState::new(),
        }
    }

    /// Breaker key for a partner on a placement.
    pub fn key(partner_id: &str, placement_id: &str) -> String {
        format!("{}:{}", partner_id, placement_id)
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    /// Current state, applying the lazy Open -> HalfOpen transition.
    pub fn state(&self, key: &str) -> BreakerState {
        let now = self.clock.now_ms();
        let entry = self.breakers.entry_or_insert_with(key, State::new);
        let mut st = lock(&entry);
        st.refresh(&self.cfg, now)
    }

    /// `true` while the breaker rejects calls. HalfOpen lets probes through.
    pub fn is_open(&self, key: &str) -> bool {
        self.state(key) == BreakerState::Open
    }

    /// Record a failed attempt. Returns the state after recording.
    pub fn record_failure(&self, key: &str) -> BreakerState {
        let now = self.clock.now_ms();
        let entry = self.breakers.entry_or_insert_with(key, State::new);
        let mut st = lock(&entry);
        let before = st.refresh(&self.cfg, now);

        st.failures.push_back(now);
        st.prune(&self.cfg, now);

        match before {
            BreakerState::Closed => {
                if st.failures.len() >= self.cfg.failure_threshold as usize {
                    st.state = BreakerState::Open;
                    st.opened_at = Some(now);
                    warn!(
                        breaker = key,
                        failures = st.failures.len(),
                        window_ms = self.cfg.time_window_ms,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                st.state = BreakerState::Open;
                st.opened_at = Some(now);
                warn!(breaker = key, "circuit breaker re-opened from half-open probe");
            }
            BreakerState::Open => {}
        }
        st.state
    }

    /// Record a successful attempt. Only a HalfOpen breaker reacts: it closes
    /// and forgets its failure history.
    pub fn record_success(&self, key: &str) -> BreakerState {
        let now = self.clock.now_ms();
        let entry = self.breakers.entry_or_insert_with(key, State::new);
        let mut st = lock(&entry);
        if st.refresh(&self.cfg, now) == BreakerState::HalfOpen {
            st.state = BreakerState::Closed;
            st.failures.clear();
            st.opened_at = None;
            info!(breaker = key, "circuit breaker closed after successful probe");
        }
        st.state
    }

    pub fn snapshot(&self, key: &str) -> CircuitBreakerSnapshot {
        let now = self.clock.now_ms();
        let entry = self.breakers.entry_or_insert_with(key, State::new);
        let mut st = lock(&entry);
        let state = st.refresh(&self.cfg, now);
        let open_remaining_ms = match (state, st.opened_at) {
            (BreakerState::Open, Some(at)) => {
                Some((at + self.cfg.recovery_time_ms).saturating_sub(now))
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            key: key.to_string(),
            state,
            failure_threshold: self.cfg.failure_threshold,
            failures_in_window: st.in_window(&self.cfg, now),
            open_remaining_ms,
        }
    }

    /// Force a breaker back to Closed with an empty history.
    pub fn reset(&self, key: &str) {
        if let Some(entry) = self.breakers.get(key) {
            *lock(&entry) = State::new();
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.breakers.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn bank(clock: Arc<ManualClock>) -> CircuitBreakerBank {
        CircuitBreakerBank::new(CircuitBreakerConfig::default(), clock)
    }

    #[test]
    fn test_circuit_breaker_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.time_window_ms, 30_000);
        assert_eq!(config.recovery_time_ms, 15_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_circuit_breaker_config_builder() {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(5)
            .with_time_window(Duration::from_secs(10))
            .with_recovery_time(Duration::from_secs(2));
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.time_window_ms, 10_000);
        assert_eq!(config.recovery_time_ms, 2_000);
    }

    #[test]
    fn test_circuit_breaker_config_validation() {
        assert!(CircuitBreakerConfig::new()
            .with_failure_threshold(0)
            .validate()
            .is_err());
        assert!(CircuitBreakerConfig::new()
            .with_time_window(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_initial_state_closed() {
        let b = bank(Arc::new(ManualClock::new(0)));
        assert_eq!(b.state("admob:home"), BreakerState::Closed);
        assert!(!b.is_open("admob:home"));
        let snap = b.snapshot("admob:home");
        assert_eq!(snap.failures_in_window, 0);
        assert!(snap.open_remaining_ms.is_none());
    }

    #[test]
    fn test_opens_at_threshold_within_window() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bank(clock.clone());
        assert_eq!(b.record_failure("k"), BreakerState::Closed);
        clock.advance(1_000);
        assert_eq!(b.record_failure("k"), BreakerState::Closed);
        clock.advance(1_000);
        assert_eq!(b.record_failure("k"), BreakerState::Open);
        assert!(b.is_open("k"));
        assert_eq!(b.snapshot("k").open_remaining_ms, Some(15_000));
    }

    #[test]
    fn test_stale_failures_pruned() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bank(clock.clone());
        b.record_failure("k");
        b.record_failure("k");
        clock.advance(30_000);
        // the two old failures fall out of the window
        assert_eq!(b.record_failure("k"), BreakerState::Closed);
        assert_eq!(b.snapshot("k").failures_in_window, 1);
    }

    #[test]
    fn test_lazy_half_open_after_recovery() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bank(clock.clone());
        for _ in 0..3 {
            b.record_failure("k");
        }
        clock.advance(14_999);
        assert_eq!(b.state("k"), BreakerState::Open);
        clock.advance(1);
        assert_eq!(b.state("k"), BreakerState::HalfOpen);
        assert!(!b.is_open("k"));
    }

    #[test]
    fn test_half_open_success_closes_and_clears() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bank(clock.clone());
        for _ in 0..3 {
            b.record_failure("k");
        }
        clock.advance(15_000);
        assert_eq!(b.record_success("k"), BreakerState::Closed);
        assert_eq!(b.snapshot("k").failures_in_window, 0);
        // history was cleared, so two new failures do not reopen
        b.record_failure("k");
        b.record_failure("k");
        assert_eq!(b.state("k"), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bank(clock.clone());
        for _ in 0..3 {
            b.record_failure("k");
        }
        clock.advance(20_000);
        assert_eq!(b.state("k"), BreakerState::HalfOpen);
        assert_eq!(b.record_failure("k"), BreakerState::Open);
        assert_eq!(b.snapshot("k").open_remaining_ms, Some(15_000));
    }

    #[test]
    fn test_success_while_closed_is_noop() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bank(clock.clone());
        b.record_failure("k");
        b.record_failure("k");
        assert_eq!(b.record_success("k"), BreakerState::Closed);
        // failures were not cleared by the closed-state success
        assert_eq!(b.snapshot("k").failures_in_window, 2);
        assert_eq!(b.record_failure("k"), BreakerState::Open);
    }

    #[test]
    fn test_success_while_open_is_noop() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bank(clock.clone());
        for _ in 0..3 {
            b.record_failure("k");
        }
        assert_eq!(b.record_success("k"), BreakerState::Open);
    }

    #[test]
    fn test_keys_are_independent() {
        let b = bank(Arc::new(ManualClock::new(0)));
        let a = CircuitBreakerBank::key("admob", "home");
        let c = CircuitBreakerBank::key("admob", "level_end");
        for _ in 0..3 {
            b.record_failure(&a);
        }
        assert!(b.is_open(&a));
        assert!(!b.is_open(&c));
    }

    #[test]
    fn test_reset() {
        let b = bank(Arc::new(ManualClock::new(0)));
        for _ in 0..3 {
            b.record_failure("k");
        }
        b.reset("k");
        assert_eq!(b.state("k"), BreakerState::Closed);
        assert_eq!(b.snapshot("k").failures_in_window, 0);
    }

    #[test]
    fn test_thread_safe_failure_counting() {
        let clock = Arc::new(ManualClock::new(0));
        let cfg = CircuitBreakerConfig::new().with_failure_threshold(1_000);
        let b = Arc::new(CircuitBreakerBank::new(cfg, clock));

        let mut handles = vec![];
        for _ in 0..10 {
            let b = Arc::clone(&b);
            handles.push(std::thread::spawn(move || {
                for _ in 0..5 {
                    b.record_failure("k");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(b.snapshot("k").failures_in_window, 50);
    }
}
