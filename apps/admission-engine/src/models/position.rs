//! Open positions, close orders, and the closed-trade record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::candidate::StrategyTier;

/// An open position under management.
///
/// Created when an admitted order fills; marked on each valuation cycle;
/// moved to the closed-trade ledger when an exit rule fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Position ID (the run ID of the admitting pipeline run).
    pub id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Strategy tier, which selects the applicable exit rules.
    pub tier: StrategyTier,
    /// Quantity held.
    pub quantity: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Latest mark price.
    pub mark_price: Decimal,
    /// Entry timestamp.
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Open a position from a fill.
    #[must_use]
    pub fn open(
        id: impl Into<String>,
        symbol: impl Into<String>,
        tier: StrategyTier,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            tier,
            quantity,
            entry_price,
            mark_price: entry_price,
            opened_at: Utc::now(),
        }
    }

    /// Update the mark price from the latest valuation.
    pub fn mark(&mut self, price: Decimal) {
        self.mark_price = price;
    }

    /// Unrealized P/L as a fraction of entry (0.10 = +10%).
    ///
    /// Zero when the entry price is zero (defunct data should not panic a
    /// valuation cycle).
    #[must_use]
    pub fn unrealized_pl_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.mark_price - self.entry_price) / self.entry_price
    }

    /// Days the position has been held as of `now`.
    #[must_use]
    pub fn holding_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_days()
    }
}

/// Which exit rule produced a close order.
///
/// When several rules fire on the same scan, the recorded reason follows the
/// fixed priority stop-loss > take-profit > max-holding-period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Stop-loss threshold breached.
    StopLoss,
    /// Take-profit threshold reached.
    TakeProfit,
    /// Maximum holding period exceeded.
    MaxHoldingPeriod,
    /// Circuit breaker entered a halted tier; all positions are closed.
    CircuitBreaker,
    /// Operator-initiated close.
    Manual,
}

impl CloseReason {
    /// Stable string form used in logs and the ledger.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::MaxHoldingPeriod => "max_holding_period",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A close order emitted by the position manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseOrder {
    /// Position being closed.
    pub position_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Quantity to close.
    pub quantity: Decimal,
    /// Exit rule that fired.
    pub reason: CloseReason,
    /// Unrealized P/L at the time the rule fired.
    pub unrealized_pl_pct: Decimal,
}

/// A completed trade in the closed-trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Position ID.
    pub position_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Strategy tier.
    pub tier: StrategyTier,
    /// Quantity closed.
    pub quantity: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Exit price.
    pub exit_price: Decimal,
    /// Realized P/L as a fraction of entry.
    pub realized_pl_pct: Decimal,
    /// Exit rule that closed the trade.
    pub reason: CloseReason,
    /// Entry timestamp.
    pub opened_at: DateTime<Utc>,
    /// Exit timestamp.
    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    /// Build the ledger record for a filled close order.
    #[must_use]
    pub fn from_fill(position: &Position, exit_price: Decimal, reason: CloseReason) -> Self {
        let realized_pl_pct = if position.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (exit_price - position.entry_price) / position.entry_price
        };
        Self {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            tier: position.tier,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price,
            realized_pl_pct,
            reason,
            opened_at: position.opened_at,
            closed_at: Utc::now(),
        }
    }

    /// Whether the trade realized a gain.
    #[must_use]
    pub fn is_win(&self) -> bool {
        self.realized_pl_pct > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unrealized_pl() {
        let mut position = Position::open("pos-1", "AAPL", StrategyTier::Growth, dec!(10), dec!(100));
        assert_eq!(position.unrealized_pl_pct(), Decimal::ZERO);

        position.mark(dec!(110));
        assert_eq!(position.unrealized_pl_pct(), dec!(0.1));

        position.mark(dec!(95));
        assert_eq!(position.unrealized_pl_pct(), dec!(-0.05));
    }

    #[test]
    fn test_zero_entry_price_does_not_panic() {
        let position = Position::open("pos-1", "AAPL", StrategyTier::Growth, dec!(10), dec!(0));
        assert_eq!(position.unrealized_pl_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_closed_trade_from_fill() {
        let position = Position::open("pos-1", "AAPL", StrategyTier::Growth, dec!(10), dec!(100));
        let trade = ClosedTrade::from_fill(&position, dec!(112), CloseReason::TakeProfit);

        assert_eq!(trade.realized_pl_pct, dec!(0.12));
        assert!(trade.is_win());

        let loser = ClosedTrade::from_fill(&position, dec!(97), CloseReason::StopLoss);
        assert!(!loser.is_win());
    }

    #[test]
    fn test_holding_days() {
        let mut position = Position::open("pos-1", "AAPL", StrategyTier::Growth, dec!(10), dec!(100));
        position.opened_at = Utc::now() - chrono::Duration::days(30);
        assert_eq!(position.holding_days(Utc::now()), 30);
    }
}
