//! Run-level state machine.

use crate::types::{AttemptDetail, AttemptOutcome, Source};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Phase of one mediation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    NotStarted,
    SelectingGroup,
    Attempting,
    Retrying,
    HedgeWaiting,
    Success,
    GroupExhausted,
    Done,
}

impl ExecutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::SelectingGroup => "selecting_group",
            Self::Attempting => "attempting",
            Self::Retrying => "retrying",
            Self::HedgeWaiting => "hedge_waiting",
            Self::Success => "success",
            Self::GroupExhausted => "group_exhausted",
            Self::Done => "done",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition(self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        match (self, next) {
            (_, Done) => self != Done,
            (NotStarted, SelectingGroup) => true,
            (SelectingGroup, Attempting | GroupExhausted) => true,
            (Attempting, Attempting | Success | Retrying | HedgeWaiting | GroupExhausted) => true,
            (HedgeWaiting, Attempting | Success | Retrying | GroupExhausted) => true,
            (Retrying, Attempting) => true,
            (GroupExhausted, SelectingGroup) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable bookkeeping for one run.
pub(crate) struct RunState {
    placement_id: String,
    phase: ExecutionPhase,
    started: Instant,
    pub details: Vec<AttemptDetail>,
    pub last_outcome: Option<AttemptOutcome>,
    pub last_source: Option<String>,
}

impl RunState {
    pub fn new(placement_id: &str) -> Self {
        Self {
            placement_id: placement_id.to_string(),
            phase: ExecutionPhase::NotStarted,
            started: Instant::now(),
            details: Vec::new(),
            last_outcome: None,
            last_source: None,
        }
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    pub fn transition(&mut self, next: ExecutionPhase) {
        debug_assert!(
            self.phase.can_transition(next),
            "illegal transition {} -> {}",
            self.phase,
            next
        );
        debug!(
            placement_id = %self.placement_id,
            from = %self.phase,
            to = %next,
            "phase transition"
        );
        self.phase = next;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Offset of `at` from the run start, in ms.
    pub fn offset_ms(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.started).as_millis() as u64
    }

    /// Append a timeline row and remember the outcome as the latest one.
    pub fn push_detail(
        &mut self,
        source: &Source,
        started_at: Instant,
        outcome: &AttemptOutcome,
        retry: bool,
        hedged: bool,
        timeout_ms: u64,
    ) {
        self.details.push(AttemptDetail {
            source_id: source.id().to_string(),
            priority: source.priority(),
            started_at_ms: self.offset_ms(started_at),
            duration_ms: started_at.elapsed().as_millis() as u64,
            result_kind: outcome.kind(),
            reason: outcome.no_bid_reason().map(|r| r.name()),
            retry,
            hedged,
            timeout_ms,
        });
        self.last_outcome = Some(outcome.clone());
        self.last_source = Some(source.id().to_string());
    }
}
