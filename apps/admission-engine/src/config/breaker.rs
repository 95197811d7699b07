//! Drawdown circuit-breaker configuration.

use serde::{Deserialize, Serialize};

use super::{ConfigError, to_decimal};
use crate::breaker::BreakerPolicy;

/// Circuit-breaker tier thresholds and policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Drawdown fraction entering Level1.
    #[serde(default = "default_level1")]
    pub level1_drawdown: f64,
    /// Drawdown fraction entering Level2.
    #[serde(default = "default_level2")]
    pub level2_drawdown: f64,
    /// Drawdown fraction entering Level3.
    #[serde(default = "default_level3")]
    pub level3_drawdown: f64,
    /// Drawdown fraction entering Level4.
    #[serde(default = "default_level4")]
    pub level4_drawdown: f64,
    /// Drawdown fraction entering Level5.
    #[serde(default = "default_level5")]
    pub level5_drawdown: f64,
    /// Recovery cooldown window in seconds.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Recovery cooldown while trading is halted (Level4), in seconds.
    #[serde(default = "default_halt_cooldown")]
    pub halt_cooldown_secs: u64,
    /// Consecutive losses before the streak multiplier engages.
    #[serde(default = "default_loss_streak_threshold")]
    pub loss_streak_threshold: u32,
    /// Size multiplier applied while the streak is active.
    #[serde(default = "default_loss_streak_multiplier")]
    pub loss_streak_multiplier: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            level1_drawdown: default_level1(),
            level2_drawdown: default_level2(),
            level3_drawdown: default_level3(),
            level4_drawdown: default_level4(),
            level5_drawdown: default_level5(),
            cooldown_secs: default_cooldown(),
            halt_cooldown_secs: default_halt_cooldown(),
            loss_streak_threshold: default_loss_streak_threshold(),
            loss_streak_multiplier: default_loss_streak_multiplier(),
        }
    }
}

impl BreakerConfig {
    /// Convert into the breaker's policy.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] on a non-finite threshold.
    pub fn to_policy(&self) -> Result<BreakerPolicy, ConfigError> {
        Ok(BreakerPolicy {
            level1_drawdown: to_decimal(self.level1_drawdown, "breaker.level1_drawdown")?,
            level2_drawdown: to_decimal(self.level2_drawdown, "breaker.level2_drawdown")?,
            level3_drawdown: to_decimal(self.level3_drawdown, "breaker.level3_drawdown")?,
            level4_drawdown: to_decimal(self.level4_drawdown, "breaker.level4_drawdown")?,
            level5_drawdown: to_decimal(self.level5_drawdown, "breaker.level5_drawdown")?,
            cooldown_secs: self.cooldown_secs,
            halt_cooldown_secs: self.halt_cooldown_secs,
            loss_streak_threshold: self.loss_streak_threshold,
            loss_streak_multiplier: to_decimal(
                self.loss_streak_multiplier,
                "breaker.loss_streak_multiplier",
            )?,
        })
    }
}

const fn default_level1() -> f64 {
    0.005
}

const fn default_level2() -> f64 {
    0.02
}

const fn default_level3() -> f64 {
    0.05
}

const fn default_level4() -> f64 {
    0.10
}

const fn default_level5() -> f64 {
    0.20
}

const fn default_cooldown() -> u64 {
    24 * 60 * 60
}

const fn default_halt_cooldown() -> u64 {
    7 * 24 * 60 * 60
}

const fn default_loss_streak_threshold() -> u32 {
    3
}

const fn default_loss_streak_multiplier() -> f64 {
    0.75
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_match_policy_defaults() {
        let policy = BreakerConfig::default().to_policy().unwrap();
        assert_eq!(policy, BreakerPolicy::default());
        assert_eq!(policy.level3_drawdown, dec!(0.05));
    }
}
