//! Pipeline run records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::candidate::TradeCandidate;
use super::verdict::{GateVerdict, ReasonCode};

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Every gate passed and the order was submitted.
    #[serde(rename = "admitted")]
    Admitted,
    /// A gate (or pre-flight check) rejected the candidate.
    #[serde(rename = "rejected")]
    Rejected,
    /// The kill switch aborted the run before submission.
    #[serde(rename = "aborted-by-killswitch")]
    AbortedByKillSwitch,
    /// A halting circuit-breaker tier aborted the run.
    #[serde(rename = "aborted-by-circuit-breaker")]
    AbortedByCircuitBreaker,
}

impl RunState {
    /// Stable string form used in logs and persisted checkpoints.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::Rejected => "rejected",
            Self::AbortedByKillSwitch => "aborted-by-killswitch",
            Self::AbortedByCircuitBreaker => "aborted-by-circuit-breaker",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Contextual inputs snapshotted at evaluation time.
///
/// Stored inside the run so replay is self-contained: re-executing the gates
/// against this snapshot must reproduce the recorded verdicts even if the
/// live breaker tier or account has since moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Circuit-breaker size multiplier in effect at evaluation time.
    pub size_multiplier: Decimal,
    /// Account buying power at evaluation time.
    pub buying_power: Decimal,
    /// Whether at least one broker backend was healthy at evaluation time.
    pub broker_available: bool,
}

/// Error returned when mutating a sealed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pipeline run is sealed")]
pub struct RunSealed;

/// Append-only record of one trip through the gate pipeline.
///
/// Written once, gate by gate, then sealed with a terminal state. A sealed
/// run is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run ID.
    pub run_id: String,
    /// The candidate under evaluation.
    pub candidate: TradeCandidate,
    /// Contextual inputs snapshotted at evaluation time.
    pub context: RunContext,
    /// Ordered gate verdicts.
    pub verdicts: Vec<GateVerdict>,
    /// Terminal state; `None` while the run is in flight.
    pub terminal: Option<RunState>,
    /// Reason code attached to the terminal state.
    pub terminal_reason: Option<ReasonCode>,
    /// Run start timestamp.
    pub started_at: DateTime<Utc>,
    /// Seal timestamp; `None` while the run is in flight.
    pub sealed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Start a new run for a candidate.
    #[must_use]
    pub fn new(candidate: TradeCandidate, context: RunContext) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            candidate,
            context,
            verdicts: Vec::new(),
            terminal: None,
            terminal_reason: None,
            started_at: Utc::now(),
            sealed_at: None,
        }
    }

    /// Whether the run has been sealed.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.terminal.is_some()
    }

    /// Append a gate verdict.
    ///
    /// # Errors
    ///
    /// Returns [`RunSealed`] if the run already has a terminal state.
    pub fn push_verdict(&mut self, verdict: GateVerdict) -> Result<(), RunSealed> {
        if self.is_sealed() {
            return Err(RunSealed);
        }
        self.verdicts.push(verdict);
        Ok(())
    }

    /// Seal the run with a terminal state and reason.
    ///
    /// # Errors
    ///
    /// Returns [`RunSealed`] if the run is already sealed.
    pub fn seal(&mut self, state: RunState, reason: Option<ReasonCode>) -> Result<(), RunSealed> {
        if self.is_sealed() {
            return Err(RunSealed);
        }
        self.terminal = Some(state);
        self.terminal_reason = reason;
        self.sealed_at = Some(Utc::now());
        Ok(())
    }
}
