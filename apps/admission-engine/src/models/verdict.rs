//! Gate verdicts and reason codes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of a single gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOutcome {
    /// Candidate cleared the gate.
    Pass,
    /// Candidate was rejected; later gates are not invoked.
    Reject,
}

/// Machine-readable reason codes for verdicts and terminal run states.
///
/// The string form is what appears in checkpoints and logs; reconstructing
/// why a trade was or wasn't made must never require replaying internal
/// computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Gate passed.
    Passed,
    /// Momentum score below the gate threshold.
    MomentumBelowThreshold,
    /// Model confidence below the gate threshold.
    ConfidenceBelowThreshold,
    /// Sentiment score below the gate threshold.
    SentimentBelowThreshold,
    /// A required named score is missing from the candidate.
    MissingScore,
    /// Scorer did not answer within the per-gate timeout (fail-closed).
    ScorerTimeout,
    /// Position size after restrictions is below the minimum order size.
    RiskSizeTooSmall,
    /// Account buying power cannot cover the sized order.
    InsufficientBuyingPower,
    /// No broker backend is healthy enough to take the order.
    NoBrokerAvailable,
    /// A backend definitively rejected the submitted order.
    BrokerRejected,
    /// Circuit breaker tier pauses new entries.
    CircuitBreakerPaused,
    /// Circuit breaker tier halts trading entirely.
    CircuitBreakerHalted,
    /// Kill switch is active.
    KillSwitchActive,
    /// Candidate already executed today (duplicate guard).
    DuplicateCandidate,
}

impl ReasonCode {
    /// Stable string form used in logs and persisted checkpoints.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::MomentumBelowThreshold => "momentum_below_threshold",
            Self::ConfidenceBelowThreshold => "confidence_below_threshold",
            Self::SentimentBelowThreshold => "sentiment_below_threshold",
            Self::MissingScore => "missing_score",
            Self::ScorerTimeout => "scorer_timeout",
            Self::RiskSizeTooSmall => "risk_size_too_small",
            Self::InsufficientBuyingPower => "insufficient_buying_power",
            Self::NoBrokerAvailable => "no_broker_available",
            Self::BrokerRejected => "broker_rejected",
            Self::CircuitBreakerPaused => "circuit_breaker_paused",
            Self::CircuitBreakerHalted => "circuit_breaker_halted",
            Self::KillSwitchActive => "kill_switch_active",
            Self::DuplicateCandidate => "duplicate_candidate",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verdict returned by a single gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Name of the gate that produced this verdict.
    pub gate: String,
    /// Pass or reject.
    pub outcome: GateOutcome,
    /// Reason code for the outcome.
    pub reason: ReasonCode,
    /// Gate's confidence in the verdict, in [0, 1].
    pub confidence: f64,
    /// Side-channel: notional after restriction-aware sizing, when the gate
    /// adjusts it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_notional: Option<Decimal>,
}

impl GateVerdict {
    /// A passing verdict.
    #[must_use]
    pub fn pass(gate: impl Into<String>, confidence: f64) -> Self {
        Self {
            gate: gate.into(),
            outcome: GateOutcome::Pass,
            reason: ReasonCode::Passed,
            confidence,
            adjusted_notional: None,
        }
    }

    /// A rejecting verdict.
    #[must_use]
    pub fn reject(gate: impl Into<String>, reason: ReasonCode, confidence: f64) -> Self {
        Self {
            gate: gate.into(),
            outcome: GateOutcome::Reject,
            reason,
            confidence,
            adjusted_notional: None,
        }
    }

    /// Attach an adjusted notional to the verdict.
    #[must_use]
    pub const fn with_adjusted_notional(mut self, notional: Decimal) -> Self {
        self.adjusted_notional = Some(notional);
        self
    }

    /// Whether this verdict rejects the candidate.
    #[must_use]
    pub fn is_reject(&self) -> bool {
        self.outcome == GateOutcome::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reason_code_strings() {
        assert_eq!(
            ReasonCode::MomentumBelowThreshold.as_str(),
            "momentum_below_threshold"
        );
        assert_eq!(
            ReasonCode::CircuitBreakerPaused.as_str(),
            "circuit_breaker_paused"
        );
        assert_eq!(ReasonCode::KillSwitchActive.as_str(), "kill_switch_active");
    }

    #[test]
    fn test_verdict_constructors() {
        let pass = GateVerdict::pass("momentum", 0.9);
        assert!(!pass.is_reject());
        assert_eq!(pass.reason, ReasonCode::Passed);

        let reject = GateVerdict::reject("momentum", ReasonCode::MomentumBelowThreshold, 0.9);
        assert!(reject.is_reject());
    }

    #[test]
    fn test_adjusted_notional_side_channel() {
        let verdict = GateVerdict::pass("risk_sizing", 1.0).with_adjusted_notional(dec!(500));
        assert_eq!(verdict.adjusted_notional, Some(dec!(500)));

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["adjusted_notional"], "500");
    }

    #[test]
    fn test_reason_code_serde() {
        let json = serde_json::to_string(&ReasonCode::ScorerTimeout).unwrap();
        assert_eq!(json, "\"scorer_timeout\"");
    }
}
