//! Evaluation context handed to every gate.

use rust_decimal::Decimal;

use crate::models::{GateVerdict, RunContext};

/// Inputs a gate is allowed to read.
///
/// Built either from live engine state or from a run's stored
/// [`RunContext`]; gates cannot tell the difference, which is what makes
/// replay produce the same verdicts as the original evaluation.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    /// Circuit-breaker size multiplier in effect.
    pub size_multiplier: Decimal,
    /// Account buying power.
    pub buying_power: Decimal,
    /// Whether at least one broker backend is usable.
    pub broker_available: bool,
    /// Verdicts from earlier gates in this run, in order.
    pub prior: &'a [GateVerdict],
}

impl<'a> GateContext<'a> {
    /// Build a context from a run's stored snapshot.
    #[must_use]
    pub fn from_run(context: &RunContext, prior: &'a [GateVerdict]) -> Self {
        Self {
            size_multiplier: context.size_multiplier,
            buying_power: context.buying_power,
            broker_available: context.broker_available,
            prior,
        }
    }

    /// The notional after the most recent sizing adjustment, or `fallback`
    /// when no earlier gate adjusted it.
    #[must_use]
    pub fn sized_notional(&self, fallback: Decimal) -> Decimal {
        self.prior
            .iter()
            .rev()
            .find_map(|v| v.adjusted_notional)
            .unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sized_notional_prefers_latest_adjustment() {
        let verdicts = vec![
            GateVerdict::pass("momentum", 0.9),
            GateVerdict::pass("risk_sizing", 1.0).with_adjusted_notional(dec!(500)),
        ];
        let ctx = GateContext {
            size_multiplier: dec!(0.5),
            buying_power: dec!(10000),
            broker_available: true,
            prior: &verdicts,
        };

        assert_eq!(ctx.sized_notional(dec!(1000)), dec!(500));
        assert_eq!(
            GateContext { prior: &[], ..ctx }.sized_notional(dec!(1000)),
            dec!(1000)
        );
    }
}
