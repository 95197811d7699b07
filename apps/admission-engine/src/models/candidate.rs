//! Candidate trades entering the gate pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy / open long.
    Buy,
    /// Sell / close or open short.
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Capital-allocation bucket a candidate belongs to.
///
/// Each tier carries its own exit-rule parameters (see the positions config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyTier {
    /// Buy-and-hold core holdings, no automatic exits.
    Core,
    /// Growth positions with stop-loss / take-profit / max-hold rules.
    Growth,
    /// Options positions with tighter exit rules.
    Options,
}

impl StrategyTier {
    /// Stable string form used in logs and persisted state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Growth => "growth",
            Self::Options => "options",
        }
    }
}

impl std::fmt::Display for StrategyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named score attached to a candidate by an external scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSample {
    /// Raw score value in [0, 1].
    pub value: f64,
    /// Scorer's confidence in the value, in [0, 1].
    pub confidence: f64,
}

impl ScoreSample {
    /// Create a score sample.
    #[must_use]
    pub const fn new(value: f64, confidence: f64) -> Self {
        Self { value, confidence }
    }
}

/// A candidate trade awaiting admission.
///
/// Immutable once created; the pipeline consumes it by reference and never
/// writes back into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCandidate {
    /// Unique candidate ID.
    pub id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Requested notional (account currency).
    pub notional: Decimal,
    /// Strategy tier.
    pub tier: StrategyTier,
    /// Named scores supplied by external scorers (momentum, confidence,
    /// sentiment). Keys are the gate score names.
    pub scores: BTreeMap<String, ScoreSample>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TradeCandidate {
    /// Create a new candidate with a generated ID.
    #[must_use]
    pub fn new(symbol: impl Into<String>, side: OrderSide, notional: Decimal, tier: StrategyTier) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            notional,
            tier,
            scores: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a named score.
    #[must_use]
    pub fn with_score(mut self, name: impl Into<String>, value: f64, confidence: f64) -> Self {
        self.scores
            .insert(name.into(), ScoreSample::new(value, confidence));
        self
    }

    /// Look up a named score.
    #[must_use]
    pub fn score(&self, name: &str) -> Option<ScoreSample> {
        self.scores.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_candidate_builder() {
        let candidate = TradeCandidate::new("AAPL", OrderSide::Buy, dec!(1000), StrategyTier::Growth)
            .with_score("momentum", 0.8, 0.9)
            .with_score("sentiment", 0.6, 0.7);

        assert_eq!(candidate.symbol, "AAPL");
        assert_eq!(candidate.tier, StrategyTier::Growth);
        assert!(!candidate.id.is_empty());

        let momentum = candidate.score("momentum").unwrap();
        assert!((momentum.value - 0.8).abs() < f64::EPSILON);
        assert!(candidate.score("missing").is_none());
    }

    #[test]
    fn test_tier_serde_round_trip() {
        let json = serde_json::to_string(&StrategyTier::Growth).unwrap();
        assert_eq!(json, "\"growth\"");
        let tier: StrategyTier = serde_json::from_str(&json).unwrap();
        assert_eq!(tier, StrategyTier::Growth);
    }

    #[test]
    fn test_side_display() {
        assert_eq!(OrderSide::Buy.to_string(), "buy");
        assert_eq!(OrderSide::Sell.to_string(), "sell");
    }
}
