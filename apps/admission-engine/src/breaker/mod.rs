//! Portfolio-level drawdown circuit breaker.
//!
//! Distinct from any per-backend broker circuit breaking: this state machine
//! watches realized portfolio risk and throttles or halts *admission*.
//!
//! # State machine
//!
//! ```text
//! Normal → Level1 (minor drawdown, no restriction)
//!        → Level2 (halve size)
//!        → Level3 (quarter size + pause new entries)
//!        → Level4 (halt trading, close positions)
//!        → Level5 (hard stop, manual restart only)
//! ```
//!
//! Upward transitions fire the instant a threshold is breached on any
//! [`DrawdownBreaker::update`]. Downward transitions happen only through the
//! explicit [`DrawdownBreaker::reevaluate`] entry point, one tier at a time,
//! and only after the cooldown window has elapsed with the drawdown staying
//! below the current tier's entry threshold for the whole window. That
//! hysteresis prevents oscillation at a boundary; there is no silent
//! auto-recovery on a single good tick.
//!
//! A consecutive-loss counter escalates restriction independently of the
//! drawdown percentage and resets only on a winning trade.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Risk-restriction tier, ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerTier {
    /// No drawdown of note.
    Normal,
    /// Minor drawdown, no restriction.
    Level1,
    /// Halve position sizes.
    Level2,
    /// Quarter position sizes and pause new entries.
    Level3,
    /// Halt trading and close positions.
    Level4,
    /// Hard stop; only a manual reset recovers.
    Level5,
}

impl BreakerTier {
    /// Stable string form used in logs and persisted state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Level1 => "level1",
            Self::Level2 => "level2",
            Self::Level3 => "level3",
            Self::Level4 => "level4",
            Self::Level5 => "level5",
        }
    }

    /// The tier one step less restrictive, saturating at `Normal`.
    #[must_use]
    pub const fn step_down(&self) -> Self {
        match self {
            Self::Normal | Self::Level1 => Self::Normal,
            Self::Level2 => Self::Level1,
            Self::Level3 => Self::Level2,
            Self::Level4 => Self::Level3,
            Self::Level5 => Self::Level4,
        }
    }
}

impl std::fmt::Display for BreakerTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Portfolio metrics fed into the breaker on each update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    /// Trailing peak-to-current drawdown as a fraction (0.06 = 6%).
    pub drawdown: Decimal,
}

impl PortfolioMetrics {
    /// Metrics from a raw drawdown fraction.
    #[must_use]
    pub const fn from_drawdown(drawdown: Decimal) -> Self {
        Self { drawdown }
    }

    /// Metrics from current and trailing-peak equity.
    #[must_use]
    pub fn from_equity(equity: Decimal, peak_equity: Decimal) -> Self {
        let drawdown = if peak_equity.is_zero() || equity >= peak_equity {
            Decimal::ZERO
        } else {
            (peak_equity - equity) / peak_equity
        };
        Self { drawdown }
    }
}

/// Active restrictions derived from the current tier and loss streak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Restrictions {
    /// Multiplier applied to candidate position sizes.
    pub size_multiplier: Decimal,
    /// New entries are paused (Level3 and above).
    pub entries_paused: bool,
    /// Trading is halted outright (Level4 and Level5); fatal to in-flight
    /// runs.
    pub trading_halted: bool,
}

/// Breaker thresholds and policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerPolicy {
    /// Drawdown fraction that enters Level1.
    pub level1_drawdown: Decimal,
    /// Drawdown fraction that enters Level2.
    pub level2_drawdown: Decimal,
    /// Drawdown fraction that enters Level3.
    pub level3_drawdown: Decimal,
    /// Drawdown fraction that enters Level4.
    pub level4_drawdown: Decimal,
    /// Drawdown fraction that enters Level5.
    pub level5_drawdown: Decimal,
    /// Minimum window a tier must hold, with the drawdown below its entry
    /// threshold, before one downward step is allowed.
    pub cooldown_secs: u64,
    /// Cooldown applied instead of `cooldown_secs` while trading is halted
    /// (Level4). Halted tiers pause for days, not hours.
    pub halt_cooldown_secs: u64,
    /// Consecutive losing trades that trigger the streak multiplier.
    pub loss_streak_threshold: u32,
    /// Size multiplier applied while the loss streak is active.
    pub loss_streak_multiplier: Decimal,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            level1_drawdown: dec!(0.005),
            level2_drawdown: dec!(0.02),
            level3_drawdown: dec!(0.05),
            level4_drawdown: dec!(0.10),
            level5_drawdown: dec!(0.20),
            cooldown_secs: 24 * 60 * 60,
            halt_cooldown_secs: 7 * 24 * 60 * 60,
            loss_streak_threshold: 3,
            loss_streak_multiplier: dec!(0.75),
        }
    }
}

impl BreakerPolicy {
    /// Tier a given drawdown maps into, ignoring hysteresis.
    #[must_use]
    pub fn tier_for_drawdown(&self, drawdown: Decimal) -> BreakerTier {
        if drawdown >= self.level5_drawdown {
            BreakerTier::Level5
        } else if drawdown >= self.level4_drawdown {
            BreakerTier::Level4
        } else if drawdown >= self.level3_drawdown {
            BreakerTier::Level3
        } else if drawdown >= self.level2_drawdown {
            BreakerTier::Level2
        } else if drawdown >= self.level1_drawdown {
            BreakerTier::Level1
        } else {
            BreakerTier::Normal
        }
    }

    /// Entry threshold of a tier (the drawdown that admits it).
    #[must_use]
    pub const fn entry_threshold(&self, tier: BreakerTier) -> Decimal {
        match tier {
            BreakerTier::Normal => Decimal::ZERO,
            BreakerTier::Level1 => self.level1_drawdown,
            BreakerTier::Level2 => self.level2_drawdown,
            BreakerTier::Level3 => self.level3_drawdown,
            BreakerTier::Level4 => self.level4_drawdown,
            BreakerTier::Level5 => self.level5_drawdown,
        }
    }
}

/// Serializable snapshot of the breaker's mutable state.
///
/// Persisted across restarts so a halted tier cannot be cleared by bouncing
/// the process; Level5 still requires [`DrawdownBreaker::manual_reset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    /// Current tier.
    pub tier: BreakerTier,
    /// Timestamp of the last tier transition.
    pub last_transition_at: DateTime<Utc>,
    /// Start of the current below-threshold window, if one is open.
    pub below_since: Option<DateTime<Utc>>,
    /// Last drawdown fed into the breaker.
    pub last_drawdown: Decimal,
    /// Consecutive losing trades so far.
    pub consecutive_losses: u32,
}

impl BreakerState {
    /// Whether this state is in a trading-halted tier.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.tier >= BreakerTier::Level4
    }
}

/// The drawdown circuit breaker.
///
/// Not internally synchronized: the engine owns one instance behind a lock
/// and serializes all transitions through it (single-writer discipline).
#[derive(Debug, Clone)]
pub struct DrawdownBreaker {
    policy: BreakerPolicy,
    tier: BreakerTier,
    last_transition_at: DateTime<Utc>,
    /// Earliest instant since which the drawdown has stayed below the
    /// current tier's entry threshold. Cleared on any re-breach.
    below_since: Option<DateTime<Utc>>,
    last_drawdown: Decimal,
    consecutive_losses: u32,
}

impl DrawdownBreaker {
    /// Create a breaker in `Normal` with the given policy.
    #[must_use]
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            tier: BreakerTier::Normal,
            last_transition_at: Utc::now(),
            below_since: None,
            last_drawdown: Decimal::ZERO,
            consecutive_losses: 0,
        }
    }

    /// Rebuild a breaker from persisted state.
    #[must_use]
    pub const fn with_state(policy: BreakerPolicy, state: BreakerState) -> Self {
        Self {
            policy,
            tier: state.tier,
            last_transition_at: state.last_transition_at,
            below_since: state.below_since,
            last_drawdown: state.last_drawdown,
            consecutive_losses: state.consecutive_losses,
        }
    }

    /// Snapshot the mutable state for persistence.
    #[must_use]
    pub const fn state(&self) -> BreakerState {
        BreakerState {
            tier: self.tier,
            last_transition_at: self.last_transition_at,
            below_since: self.below_since,
            last_drawdown: self.last_drawdown,
            consecutive_losses: self.consecutive_losses,
        }
    }

    /// Current tier.
    #[must_use]
    pub const fn tier(&self) -> BreakerTier {
        self.tier
    }

    /// Current consecutive-loss count.
    #[must_use]
    pub const fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    /// Timestamp of the last tier transition.
    #[must_use]
    pub const fn last_transition_at(&self) -> DateTime<Utc> {
        self.last_transition_at
    }

    /// Last drawdown fed into [`Self::update`].
    #[must_use]
    pub const fn last_drawdown(&self) -> Decimal {
        self.last_drawdown
    }

    /// Feed the latest metrics. Escalates immediately on breach; never steps
    /// down (see [`Self::reevaluate`]).
    pub fn update(&mut self, metrics: PortfolioMetrics, now: DateTime<Utc>) -> BreakerTier {
        self.last_drawdown = metrics.drawdown;
        let target = self.policy.tier_for_drawdown(metrics.drawdown);

        if target > self.tier {
            let from = self.tier;
            self.tier = target;
            self.last_transition_at = now;
            self.below_since = None;
            tracing::warn!(
                from = %from,
                to = %target,
                drawdown = %metrics.drawdown,
                "Circuit breaker escalated"
            );
        } else if self.tier > BreakerTier::Normal {
            // Track how long the drawdown has held below the current tier's
            // entry threshold; any re-breach restarts the clock.
            if metrics.drawdown < self.policy.entry_threshold(self.tier) {
                if self.below_since.is_none() {
                    self.below_since = Some(now);
                }
            } else {
                self.below_since = None;
            }
        }

        self.tier
    }

    /// Explicit downward re-evaluation (scheduled or operator-driven).
    ///
    /// Steps down at most one tier, and only when the cooldown has elapsed
    /// since the last transition *and* the drawdown has stayed below the
    /// current tier's entry threshold for the whole cooldown window. A halted
    /// tier (Level4) waits out the longer halt cooldown. Level5 never steps
    /// down here; it requires [`Self::manual_reset`].
    pub fn reevaluate(&mut self, now: DateTime<Utc>) -> BreakerTier {
        if self.tier == BreakerTier::Normal || self.tier == BreakerTier::Level5 {
            return self.tier;
        }

        let cooldown = Duration::seconds(self.cooldown_secs_i64());
        if now - self.last_transition_at < cooldown {
            return self.tier;
        }
        let Some(below_since) = self.below_since else {
            return self.tier;
        };
        if now - below_since < cooldown {
            return self.tier;
        }

        let from = self.tier;
        self.tier = self.tier.step_down();
        self.last_transition_at = now;
        self.below_since = if self.last_drawdown < self.policy.entry_threshold(self.tier) {
            Some(now)
        } else {
            None
        };
        tracing::info!(
            from = %from,
            to = %self.tier,
            drawdown = %self.last_drawdown,
            "Circuit breaker recovered one tier"
        );
        self.tier
    }

    /// Operator reset out of Level5 (and any other tier) back to `Normal`.
    pub fn manual_reset(&mut self, now: DateTime<Utc>) {
        let from = self.tier;
        self.tier = BreakerTier::Normal;
        self.last_transition_at = now;
        self.below_since = None;
        self.consecutive_losses = 0;
        tracing::warn!(from = %from, "Circuit breaker manually reset");
    }

    /// Record a realized trade outcome for the loss-streak counter.
    pub fn record_trade_result(&mut self, win: bool) {
        if win {
            self.consecutive_losses = 0;
            return;
        }
        self.consecutive_losses += 1;
        if self.consecutive_losses == self.policy.loss_streak_threshold {
            tracing::warn!(
                losses = self.consecutive_losses,
                multiplier = %self.policy.loss_streak_multiplier,
                "Consecutive-loss streak restriction engaged"
            );
        }
    }

    /// Restrictions currently in force.
    #[must_use]
    pub fn restrictions(&self) -> Restrictions {
        let (size_multiplier, entries_paused, trading_halted) = match self.tier {
            BreakerTier::Normal | BreakerTier::Level1 => (Decimal::ONE, false, false),
            BreakerTier::Level2 => (dec!(0.5), false, false),
            BreakerTier::Level3 => (dec!(0.25), true, false),
            BreakerTier::Level4 | BreakerTier::Level5 => (Decimal::ZERO, true, true),
        };

        let size_multiplier = if self.consecutive_losses >= self.policy.loss_streak_threshold {
            size_multiplier * self.policy.loss_streak_multiplier
        } else {
            size_multiplier
        };

        Restrictions {
            size_multiplier,
            entries_paused,
            trading_halted,
        }
    }

    fn cooldown_secs_i64(&self) -> i64 {
        let secs = if self.tier >= BreakerTier::Level4 {
            self.policy.halt_cooldown_secs
        } else {
            self.policy.cooldown_secs
        };
        i64::try_from(secs).unwrap_or(i64::MAX)
    }
}
