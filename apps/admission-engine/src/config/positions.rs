//! Per-tier exit rule configuration.

use serde::{Deserialize, Serialize};

use super::{ConfigError, to_decimal};
use crate::positions::{ExitPolicy, ExitRules};

/// Position manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsConfig {
    /// Seconds between exit-rule scans.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Exit rules for core holdings.
    #[serde(default = "default_core")]
    pub core: TierRulesConfig,
    /// Exit rules for growth positions.
    #[serde(default = "default_growth")]
    pub growth: TierRulesConfig,
    /// Exit rules for options positions.
    #[serde(default = "default_options")]
    pub options: TierRulesConfig,
}

impl Default for PositionsConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            core: default_core(),
            growth: default_growth(),
            options: default_options(),
        }
    }
}

/// Exit rules for one strategy tier; `null` disables a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierRulesConfig {
    /// Close at or below `-stop_loss_pct` unrealized P/L.
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    /// Close at or above `take_profit_pct` unrealized P/L.
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
    /// Close after more than this many holding days.
    #[serde(default)]
    pub max_holding_days: Option<i64>,
}

impl TierRulesConfig {
    fn to_rules(&self, tier: &str) -> Result<ExitRules, ConfigError> {
        let field = |name: &str| format!("positions.{tier}.{name}");
        Ok(ExitRules {
            stop_loss_pct: self
                .stop_loss_pct
                .map(|v| to_decimal(v, &field("stop_loss_pct")))
                .transpose()?,
            take_profit_pct: self
                .take_profit_pct
                .map(|v| to_decimal(v, &field("take_profit_pct")))
                .transpose()?,
            max_holding_days: self.max_holding_days,
        })
    }
}

impl PositionsConfig {
    /// Convert into the position manager's exit policy.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] on a non-finite percentage.
    pub fn to_policy(&self) -> Result<ExitPolicy, ConfigError> {
        Ok(ExitPolicy {
            core: self.core.to_rules("core")?,
            growth: self.growth.to_rules("growth")?,
            options: self.options.to_rules("options")?,
        })
    }
}

const fn default_scan_interval() -> u64 {
    60
}

fn default_core() -> TierRulesConfig {
    TierRulesConfig::default()
}

fn default_growth() -> TierRulesConfig {
    TierRulesConfig {
        stop_loss_pct: Some(0.03),
        take_profit_pct: Some(0.10),
        max_holding_days: Some(28),
    }
}

fn default_options() -> TierRulesConfig {
    TierRulesConfig {
        stop_loss_pct: Some(0.15),
        take_profit_pct: Some(0.25),
        max_holding_days: Some(14),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_exit_policy_defaults() {
        let policy = PositionsConfig::default().to_policy().unwrap();
        assert_eq!(policy, ExitPolicy::default());
    }
}
