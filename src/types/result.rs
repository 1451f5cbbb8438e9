//! Execution results handed to the caller and the mediation debugger.

use super::outcome::{AttemptOutcome, ResultKind};
use serde::{Deserialize, Serialize};

/// One row of the waterfall timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptDetail {
    pub source_id: String,
    pub priority: u32,
    /// Offset of the attempt start from the beginning of the run.
    pub started_at_ms: u64,
    pub duration_ms: u64,
    pub result_kind: ResultKind,
    /// Normalized no-bid reason for non-success attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// `true` for the in-place retry of a source.
    pub retry: bool,
    /// `true` when a hedge attempt was launched for this attempt.
    pub hedged: bool,
    /// Timeout actually enforced, after adaptation.
    pub timeout_ms: u64,
}

/// Final, fully diagnosed result of one mediation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: AttemptOutcome,
    /// Winning source on success, otherwise the last source attempted.
    pub source_id: Option<String>,
    pub attempts_count: usize,
    pub total_duration_ms: u64,
    pub attempt_details: Vec<AttemptDetail>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Winning bid, if any.
    pub fn bid(&self) -> Option<f64> {
        match self.outcome {
            AttemptOutcome::Success { bid, .. } => Some(bid),
            _ => None,
        }
    }

    /// Distinct sources the run touched, in first-attempt order.
    pub fn sources_tried(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for d in &self.attempt_details {
            if !seen.contains(&d.source_id.as_str()) {
                seen.push(&d.source_id);
            }
        }
        seen
    }
}
