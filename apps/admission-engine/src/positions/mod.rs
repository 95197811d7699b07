//! Open-position management and exit rules.
//!
//! Each scan cycle evaluates stop-loss, take-profit, and max-holding-period
//! as three independent checks per position. Every rule is always evaluated;
//! when more than one fires on the same scan, the recorded close reason
//! follows the fixed priority stop-loss > take-profit > max-holding-period.
//! The rules are never chained as mutually exclusive branches, so a
//! take-profit can not be shadowed by a stop-loss check that happened to run
//! first.
//!
//! The manager only decides *what* to close. Submission goes through the
//! broker router in the engine loop, behind the same kill-switch check as
//! admissions; fills come back through [`PositionManager::settle_close`],
//! which moves the position into the closed-trade ledger.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{CloseOrder, CloseReason, ClosedTrade, Position, StrategyTier};

/// Exit-rule parameters for one strategy tier.
///
/// `None` disables a rule for the tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitRules {
    /// Close when unrealized P/L falls to or below `-stop_loss_pct`.
    pub stop_loss_pct: Option<Decimal>,
    /// Close when unrealized P/L rises to or above `take_profit_pct`.
    pub take_profit_pct: Option<Decimal>,
    /// Close when the position has been held longer than this many days.
    pub max_holding_days: Option<i64>,
}

impl ExitRules {
    /// No automatic exits.
    pub const NONE: Self = Self {
        stop_loss_pct: None,
        take_profit_pct: None,
        max_holding_days: None,
    };
}

/// Per-tier exit rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitPolicy {
    /// Rules for core holdings.
    pub core: ExitRules,
    /// Rules for growth positions.
    pub growth: ExitRules,
    /// Rules for options positions.
    pub options: ExitRules,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            core: ExitRules::NONE,
            growth: ExitRules {
                stop_loss_pct: Some(dec!(0.03)),
                take_profit_pct: Some(dec!(0.10)),
                max_holding_days: Some(28),
            },
            options: ExitRules {
                stop_loss_pct: Some(dec!(0.15)),
                take_profit_pct: Some(dec!(0.25)),
                max_holding_days: Some(14),
            },
        }
    }
}

impl ExitPolicy {
    /// Rules applicable to a tier.
    #[must_use]
    pub const fn for_tier(&self, tier: StrategyTier) -> &ExitRules {
        match tier {
            StrategyTier::Core => &self.core,
            StrategyTier::Growth => &self.growth,
            StrategyTier::Options => &self.options,
        }
    }
}

/// Evaluate every exit rule for one position.
///
/// All three checks run unconditionally; the return value applies the
/// stop-loss > take-profit > max-holding-period priority to whatever fired.
#[must_use]
pub fn evaluate_exits(
    position: &Position,
    rules: &ExitRules,
    now: DateTime<Utc>,
) -> Option<CloseReason> {
    let pl = position.unrealized_pl_pct();

    let stop_hit = rules.stop_loss_pct.is_some_and(|stop| pl <= -stop);
    let profit_hit = rules.take_profit_pct.is_some_and(|target| pl >= target);
    let hold_hit = rules
        .max_holding_days
        .is_some_and(|days| position.holding_days(now) > days);

    if stop_hit {
        Some(CloseReason::StopLoss)
    } else if profit_hit {
        Some(CloseReason::TakeProfit)
    } else if hold_hit {
        Some(CloseReason::MaxHoldingPeriod)
    } else {
        None
    }
}

/// Wins and losses realized so far.
#[derive(Debug, Default)]
struct Ledger {
    trades: Vec<ClosedTrade>,
}

impl Ledger {
    fn win_rate(&self) -> Option<f64> {
        if self.trades.is_empty() {
            return None;
        }
        let wins = self.trades.iter().filter(|t| t.is_win()).count();
        #[allow(clippy::cast_precision_loss)]
        Some(wins as f64 / self.trades.len() as f64)
    }
}

/// Tracks open positions, scans them against exit rules, and keeps the
/// closed-trade ledger.
#[derive(Debug)]
pub struct PositionManager {
    policy: ExitPolicy,
    positions: RwLock<HashMap<String, Position>>,
    ledger: RwLock<Ledger>,
}

impl PositionManager {
    /// Create a manager with the given exit policy.
    #[must_use]
    pub fn new(policy: ExitPolicy) -> Self {
        Self {
            policy,
            positions: RwLock::new(HashMap::new()),
            ledger: RwLock::new(Ledger::default()),
        }
    }

    /// Track a newly opened position.
    pub fn open(&self, position: Position) {
        tracing::info!(
            position_id = %position.id,
            symbol = %position.symbol,
            tier = %position.tier,
            quantity = %position.quantity,
            entry_price = %position.entry_price,
            "Position opened"
        );
        self.positions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(position.id.clone(), position);
    }

    /// Update the mark price of every position in `symbol`.
    pub fn mark_price(&self, symbol: &str, price: Decimal) {
        let mut positions = self
            .positions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for position in positions.values_mut() {
            if position.symbol == symbol {
                position.mark(price);
            }
        }
    }

    /// Evaluate every open position and return the close orders due.
    ///
    /// Pure decision step: nothing is removed from the book until the close
    /// fills and [`Self::settle_close`] runs.
    #[must_use]
    pub fn scan(&self, now: DateTime<Utc>) -> Vec<CloseOrder> {
        let positions = self
            .positions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut orders = Vec::new();
        for position in positions.values() {
            let rules = self.policy.for_tier(position.tier);
            if let Some(reason) = evaluate_exits(position, rules, now) {
                tracing::info!(
                    position_id = %position.id,
                    symbol = %position.symbol,
                    reason = %reason,
                    unrealized_pl_pct = %position.unrealized_pl_pct(),
                    "Exit rule fired"
                );
                orders.push(CloseOrder {
                    position_id: position.id.clone(),
                    symbol: position.symbol.clone(),
                    quantity: position.quantity,
                    reason,
                    unrealized_pl_pct: position.unrealized_pl_pct(),
                });
            }
        }
        orders
    }

    /// Emit a close order for every open position, regardless of exit rules.
    ///
    /// Used when the circuit breaker enters a halted tier and the whole book
    /// must be flattened. Like [`Self::scan`] this only decides; positions
    /// leave the book when their closes fill.
    #[must_use]
    pub fn liquidation_orders(&self, reason: CloseReason) -> Vec<CloseOrder> {
        self.positions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .map(|position| CloseOrder {
                position_id: position.id.clone(),
                symbol: position.symbol.clone(),
                quantity: position.quantity,
                reason,
                unrealized_pl_pct: position.unrealized_pl_pct(),
            })
            .collect()
    }

    /// Settle a filled close order: remove the position and record the
    /// realized trade. Returns the ledger record, `None` if the position is
    /// no longer tracked.
    pub fn settle_close(
        &self,
        position_id: &str,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> Option<ClosedTrade> {
        let position = self
            .positions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(position_id)?;

        let trade = ClosedTrade::from_fill(&position, exit_price, reason);
        tracing::info!(
            position_id = %trade.position_id,
            symbol = %trade.symbol,
            reason = %reason,
            realized_pl_pct = %trade.realized_pl_pct,
            win = trade.is_win(),
            "Position closed"
        );
        self.ledger
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .trades
            .push(trade.clone());
        Some(trade)
    }

    /// Snapshot of open positions.
    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Look up one open position.
    #[must_use]
    pub fn get(&self, position_id: &str) -> Option<Position> {
        self.positions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(position_id)
            .cloned()
    }

    /// Number of open positions.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.positions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Snapshot of the closed-trade ledger.
    #[must_use]
    pub fn closed_trades(&self) -> Vec<ClosedTrade> {
        self.ledger
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .trades
            .clone()
    }

    /// Fraction of closed trades that realized a gain; `None` before any
    /// trade closes.
    #[must_use]
    pub fn win_rate(&self) -> Option<f64> {
        self.ledger
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .win_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn growth_position(entry: Decimal, mark: Decimal) -> Position {
        let mut p = Position::open("pos-1", "AAPL", StrategyTier::Growth, dec!(10), entry);
        p.mark(mark);
        p
    }

    #[test]
    fn test_take_profit_fires_even_with_stop_checked_first() {
        // +15% against a 10% target and a 3% stop: the stop check runs and
        // does not fire, and must not shadow the take-profit.
        let position = growth_position(dec!(100), dec!(115));
        let rules = ExitPolicy::default().growth;

        assert_eq!(
            evaluate_exits(&position, &rules, Utc::now()),
            Some(CloseReason::TakeProfit)
        );
    }

    #[test_case(dec!(96.9), Some(CloseReason::StopLoss) ; "below stop closes")]
    #[test_case(dec!(97), Some(CloseReason::StopLoss) ; "exactly at stop closes")]
    #[test_case(dec!(98), None ; "inside band holds")]
    #[test_case(dec!(110), Some(CloseReason::TakeProfit) ; "at target closes")]
    #[test_case(dec!(109.9), None ; "just under target holds")]
    #[test_case(dec!(119.9), Some(CloseReason::TakeProfit) ; "above target closes")]
    fn test_growth_thresholds(mark: Decimal, expected: Option<CloseReason>) {
        let position = growth_position(dec!(100), mark);
        let rules = ExitPolicy::default().growth;
        assert_eq!(evaluate_exits(&position, &rules, Utc::now()), expected);
    }

    #[test]
    fn test_max_holding_period() {
        let mut position = growth_position(dec!(100), dec!(101));
        position.opened_at = Utc::now() - chrono::Duration::days(29);

        assert_eq!(
            evaluate_exits(&position, &ExitPolicy::default().growth, Utc::now()),
            Some(CloseReason::MaxHoldingPeriod)
        );
    }

    #[test]
    fn test_priority_when_multiple_rules_fire() {
        // Take-profit and max-hold both fire; take-profit outranks.
        let mut position = growth_position(dec!(100), dec!(120));
        position.opened_at = Utc::now() - chrono::Duration::days(40);

        assert_eq!(
            evaluate_exits(&position, &ExitPolicy::default().growth, Utc::now()),
            Some(CloseReason::TakeProfit)
        );
    }

    #[test]
    fn test_core_tier_never_auto_closes() {
        let mut position = Position::open("pos-1", "BRK.B", StrategyTier::Core, dec!(5), dec!(100));
        position.mark(dec!(40));
        position.opened_at = Utc::now() - chrono::Duration::days(400);

        assert_eq!(
            evaluate_exits(&position, &ExitPolicy::default().core, Utc::now()),
            None
        );
    }

    #[test]
    fn test_scan_emits_close_orders() {
        let manager = PositionManager::new(ExitPolicy::default());
        manager.open(growth_position(dec!(100), dec!(115)));
        manager.open({
            let mut p = Position::open("pos-2", "MSFT", StrategyTier::Growth, dec!(5), dec!(200));
            p.mark(dec!(202));
            p
        });

        let orders = manager.scan(Utc::now());

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].position_id, "pos-1");
        assert_eq!(orders[0].reason, CloseReason::TakeProfit);
        // Scanning decides, it does not remove.
        assert_eq!(manager.open_count(), 2);
    }

    #[test]
    fn test_liquidation_orders_cover_every_position() {
        let manager = PositionManager::new(ExitPolicy::default());
        // Neither position is anywhere near an exit rule.
        manager.open(growth_position(dec!(100), dec!(101)));
        manager.open(Position::open(
            "pos-2",
            "BRK.B",
            StrategyTier::Core,
            dec!(5),
            dec!(100),
        ));

        let orders = manager.liquidation_orders(CloseReason::CircuitBreaker);

        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.reason == CloseReason::CircuitBreaker));
        // Decision only; the book is untouched until fills settle.
        assert_eq!(manager.open_count(), 2);
    }

    #[test]
    fn test_settle_close_moves_to_ledger() {
        let manager = PositionManager::new(ExitPolicy::default());
        manager.open(growth_position(dec!(100), dec!(115)));

        let trade = manager
            .settle_close("pos-1", dec!(114), CloseReason::TakeProfit)
            .unwrap();

        assert_eq!(trade.realized_pl_pct, dec!(0.14));
        assert!(trade.is_win());
        assert_eq!(manager.open_count(), 0);
        assert_eq!(manager.closed_trades().len(), 1);
        // Settling twice is a no-op.
        assert!(manager
            .settle_close("pos-1", dec!(114), CloseReason::TakeProfit)
            .is_none());
    }

    #[test]
    fn test_win_rate() {
        let manager = PositionManager::new(ExitPolicy::default());
        assert!(manager.win_rate().is_none());

        manager.open(growth_position(dec!(100), dec!(115)));
        manager.open({
            let mut p = Position::open("pos-2", "MSFT", StrategyTier::Growth, dec!(5), dec!(200));
            p.mark(dec!(190));
            p
        });
        manager.settle_close("pos-1", dec!(115), CloseReason::TakeProfit);
        manager.settle_close("pos-2", dec!(190), CloseReason::StopLoss);

        assert!((manager.win_rate().unwrap() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mark_price_updates_symbol_positions() {
        let manager = PositionManager::new(ExitPolicy::default());
        manager.open(growth_position(dec!(100), dec!(100)));

        manager.mark_price("AAPL", dec!(111));
        let positions = manager.open_positions();
        assert_eq!(positions[0].mark_price, dec!(111));
    }
}
