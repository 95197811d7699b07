//! The gate and scorer seams, plus the built-in gates.
//!
//! A gate owns its pass/reject threshold; a scorer only produces numbers.
//! The threshold rule is fixed: `score >= threshold` passes, `score <
//! threshold` rejects, identically in live evaluation and replay.
//!
//! Every scorer call runs under the per-gate timeout and a non-answer is a
//! rejection (`scorer_timeout`), never a pass.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use super::context::GateContext;
use crate::models::{GateVerdict, ReasonCode, ScoreSample, TradeCandidate};

/// Score names the built-in gates look up.
pub const SCORE_MOMENTUM: &str = "momentum";
/// Model-confidence score name.
pub const SCORE_CONFIDENCE: &str = "confidence";
/// Sentiment score name.
pub const SCORE_SENTIMENT: &str = "sentiment";

/// Scorer failure modes.
#[derive(Debug, Clone, Error)]
pub enum ScoreError {
    /// The requested named score is not available for the candidate.
    #[error("score '{0}' not available")]
    Missing(String),
}

/// External scoring seam.
///
/// Implementations may call out to models or services; the built-in
/// [`CandidateScores`] simply reads the scores already attached to the
/// candidate, which keeps replay deterministic.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Produce the named score for a candidate.
    async fn score(&self, candidate: &TradeCandidate, name: &str)
        -> Result<ScoreSample, ScoreError>;
}

/// Scorer that reads the candidate's own score map.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateScores;

#[async_trait]
impl Scorer for CandidateScores {
    async fn score(
        &self,
        candidate: &TradeCandidate,
        name: &str,
    ) -> Result<ScoreSample, ScoreError> {
        candidate
            .score(name)
            .ok_or_else(|| ScoreError::Missing(name.to_string()))
    }
}

/// A single admission check.
#[async_trait]
pub trait Gate: Send + Sync {
    /// Gate name as recorded in verdicts and checkpoints.
    fn name(&self) -> &str;

    /// Evaluate the candidate. Gates never error; every failure mode maps
    /// to a rejecting verdict with a reason code.
    async fn evaluate(&self, candidate: &TradeCandidate, ctx: &GateContext<'_>) -> GateVerdict;
}

/// Parameters for the built-in gate set.
#[derive(Debug, Clone, PartialEq)]
pub struct GateParams {
    /// Momentum gate threshold.
    pub momentum_threshold: f64,
    /// Model-confidence gate threshold.
    pub confidence_threshold: f64,
    /// Sentiment gate threshold.
    pub sentiment_threshold: f64,
    /// Per-gate scorer timeout.
    pub timeout: Duration,
    /// Smallest order the risk-sizing gate will let through.
    pub min_order_notional: Decimal,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            momentum_threshold: 0.6,
            confidence_threshold: 0.55,
            sentiment_threshold: 0.4,
            timeout: Duration::from_secs(5),
            min_order_notional: Decimal::ONE,
        }
    }
}

/// Score-threshold gate used for momentum, confidence, and sentiment.
pub struct ThresholdGate<S> {
    name: &'static str,
    score_name: &'static str,
    threshold: f64,
    reject_reason: ReasonCode,
    timeout: Duration,
    scorer: S,
}

impl<S: Scorer> ThresholdGate<S> {
    /// Create a threshold gate over a named score.
    pub const fn new(
        name: &'static str,
        score_name: &'static str,
        threshold: f64,
        reject_reason: ReasonCode,
        timeout: Duration,
        scorer: S,
    ) -> Self {
        Self {
            name,
            score_name,
            threshold,
            reject_reason,
            timeout,
            scorer,
        }
    }
}

#[async_trait]
impl<S: Scorer> Gate for ThresholdGate<S> {
    fn name(&self) -> &str {
        self.name
    }

    async fn evaluate(&self, candidate: &TradeCandidate, _ctx: &GateContext<'_>) -> GateVerdict {
        let scored = tokio::time::timeout(
            self.timeout,
            self.scorer.score(candidate, self.score_name),
        )
        .await;

        let sample = match scored {
            Ok(Ok(sample)) => sample,
            Ok(Err(ScoreError::Missing(name))) => {
                tracing::warn!(
                    gate = self.name,
                    score = %name,
                    symbol = %candidate.symbol,
                    "Required score missing"
                );
                return GateVerdict::reject(self.name, ReasonCode::MissingScore, 0.0);
            }
            Err(_) => {
                tracing::warn!(
                    gate = self.name,
                    score = self.score_name,
                    symbol = %candidate.symbol,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Scorer timed out, rejecting"
                );
                return GateVerdict::reject(self.name, ReasonCode::ScorerTimeout, 0.0);
            }
        };

        if sample.value >= self.threshold {
            GateVerdict::pass(self.name, sample.confidence)
        } else {
            GateVerdict::reject(self.name, self.reject_reason, sample.confidence)
        }
    }
}

/// Applies the circuit-breaker size multiplier and rejects orders that
/// shrink below the minimum.
pub struct RiskSizingGate {
    min_order_notional: Decimal,
}

impl RiskSizingGate {
    /// Create the sizing gate.
    #[must_use]
    pub const fn new(min_order_notional: Decimal) -> Self {
        Self { min_order_notional }
    }
}

#[async_trait]
impl Gate for RiskSizingGate {
    fn name(&self) -> &str {
        "risk_sizing"
    }

    async fn evaluate(&self, candidate: &TradeCandidate, ctx: &GateContext<'_>) -> GateVerdict {
        let adjusted = candidate.notional * ctx.size_multiplier;
        if adjusted < self.min_order_notional {
            return GateVerdict::reject(self.name(), ReasonCode::RiskSizeTooSmall, 1.0)
                .with_adjusted_notional(adjusted);
        }
        GateVerdict::pass(self.name(), 1.0).with_adjusted_notional(adjusted)
    }
}

/// Final pre-submission check: a usable backend exists and the sized order
/// fits inside buying power.
pub struct FeasibilityGate;

#[async_trait]
impl Gate for FeasibilityGate {
    fn name(&self) -> &str {
        "execution_feasibility"
    }

    async fn evaluate(&self, candidate: &TradeCandidate, ctx: &GateContext<'_>) -> GateVerdict {
        if !ctx.broker_available {
            return GateVerdict::reject(self.name(), ReasonCode::NoBrokerAvailable, 1.0);
        }
        let notional = ctx.sized_notional(candidate.notional);
        if notional > ctx.buying_power {
            return GateVerdict::reject(self.name(), ReasonCode::InsufficientBuyingPower, 1.0);
        }
        GateVerdict::pass(self.name(), 1.0)
    }
}

/// The standard gate registry, in fixed evaluation order.
#[must_use]
pub fn standard_gates(params: &GateParams) -> Vec<Box<dyn Gate>> {
    vec![
        Box::new(ThresholdGate::new(
            "momentum",
            SCORE_MOMENTUM,
            params.momentum_threshold,
            ReasonCode::MomentumBelowThreshold,
            params.timeout,
            CandidateScores,
        )),
        Box::new(ThresholdGate::new(
            "model_confidence",
            SCORE_CONFIDENCE,
            params.confidence_threshold,
            ReasonCode::ConfidenceBelowThreshold,
            params.timeout,
            CandidateScores,
        )),
        Box::new(ThresholdGate::new(
            "sentiment",
            SCORE_SENTIMENT,
            params.sentiment_threshold,
            ReasonCode::SentimentBelowThreshold,
            params.timeout,
            CandidateScores,
        )),
        Box::new(RiskSizingGate::new(params.min_order_notional)),
        Box::new(FeasibilityGate),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GateOutcome, OrderSide, StrategyTier};
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn candidate(momentum: f64) -> TradeCandidate {
        TradeCandidate::new("AAPL", OrderSide::Buy, dec!(1000), StrategyTier::Growth)
            .with_score(SCORE_MOMENTUM, momentum, 0.9)
    }

    fn ctx<'a>(prior: &'a [GateVerdict]) -> GateContext<'a> {
        GateContext {
            size_multiplier: Decimal::ONE,
            buying_power: dec!(50000),
            broker_available: true,
            prior,
        }
    }

    fn momentum_gate(threshold: f64) -> ThresholdGate<CandidateScores> {
        ThresholdGate::new(
            "momentum",
            SCORE_MOMENTUM,
            threshold,
            ReasonCode::MomentumBelowThreshold,
            Duration::from_secs(1),
            CandidateScores,
        )
    }

    // The tie-break is inclusive: a score exactly at the threshold passes.
    #[test_case(0.60, GateOutcome::Pass ; "exactly at threshold passes")]
    #[test_case(0.61, GateOutcome::Pass ; "above threshold passes")]
    #[test_case(0.59, GateOutcome::Reject ; "below threshold rejects")]
    #[tokio::test]
    async fn test_threshold_tie_break(score: f64, expected: GateOutcome) {
        let gate = momentum_gate(0.60);
        let verdict = gate.evaluate(&candidate(score), &ctx(&[])).await;
        assert_eq!(verdict.outcome, expected);
    }

    #[tokio::test]
    async fn test_missing_score_rejects() {
        let gate = momentum_gate(0.6);
        let bare = TradeCandidate::new("AAPL", OrderSide::Buy, dec!(1000), StrategyTier::Core);
        let verdict = gate.evaluate(&bare, &ctx(&[])).await;

        assert!(verdict.is_reject());
        assert_eq!(verdict.reason, ReasonCode::MissingScore);
    }

    #[tokio::test]
    async fn test_scorer_timeout_rejects() {
        struct StuckScorer;

        #[async_trait]
        impl Scorer for StuckScorer {
            async fn score(
                &self,
                _candidate: &TradeCandidate,
                _name: &str,
            ) -> Result<ScoreSample, ScoreError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ScoreSample::new(1.0, 1.0))
            }
        }

        let gate = ThresholdGate::new(
            "momentum",
            SCORE_MOMENTUM,
            0.6,
            ReasonCode::MomentumBelowThreshold,
            Duration::from_millis(20),
            StuckScorer,
        );
        let verdict = gate.evaluate(&candidate(0.9), &ctx(&[])).await;

        assert!(verdict.is_reject());
        assert_eq!(verdict.reason, ReasonCode::ScorerTimeout);
    }

    #[tokio::test]
    async fn test_risk_sizing_applies_multiplier() {
        let gate = RiskSizingGate::new(dec!(100));
        let c = candidate(0.9);

        let context = GateContext {
            size_multiplier: dec!(0.5),
            ..ctx(&[])
        };
        let verdict = gate.evaluate(&c, &context).await;
        assert!(!verdict.is_reject());
        assert_eq!(verdict.adjusted_notional, Some(dec!(500)));

        // A quartered Level3 size on a small order drops below the minimum.
        let context = GateContext {
            size_multiplier: dec!(0.05),
            ..ctx(&[])
        };
        let verdict = gate.evaluate(&c, &context).await;
        assert!(verdict.is_reject());
        assert_eq!(verdict.reason, ReasonCode::RiskSizeTooSmall);
    }

    #[tokio::test]
    async fn test_feasibility_checks_brokers_and_buying_power() {
        let gate = FeasibilityGate;
        let c = candidate(0.9);

        let context = GateContext {
            broker_available: false,
            ..ctx(&[])
        };
        let verdict = gate.evaluate(&c, &context).await;
        assert_eq!(verdict.reason, ReasonCode::NoBrokerAvailable);

        let context = GateContext {
            buying_power: dec!(10),
            ..ctx(&[])
        };
        let verdict = gate.evaluate(&c, &context).await;
        assert_eq!(verdict.reason, ReasonCode::InsufficientBuyingPower);
    }

    #[tokio::test]
    async fn test_feasibility_uses_adjusted_notional() {
        let gate = FeasibilityGate;
        let c = candidate(0.9); // requested 1000

        // Buying power covers the halved size but not the requested one.
        let prior =
            vec![GateVerdict::pass("risk_sizing", 1.0).with_adjusted_notional(dec!(500))];
        let context = GateContext {
            buying_power: dec!(600),
            ..ctx(&prior)
        };
        let verdict = gate.evaluate(&c, &context).await;
        assert!(!verdict.is_reject());
    }

    #[test]
    fn test_standard_registry_order() {
        let gates = standard_gates(&GateParams::default());
        let names: Vec<_> = gates.iter().map(|g| g.name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "momentum",
                "model_confidence",
                "sentiment",
                "risk_sizing",
                "execution_feasibility"
            ]
        );
    }
}
