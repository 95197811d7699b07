//! Configuration loading, validation, and environment interpolation.
//!
//! Configuration is a YAML file with `${VAR}` / `${VAR:-default}`
//! environment interpolation. Every section has full defaults, so an empty
//! file yields a runnable paper-mode engine; validation rejects thresholds
//! that are out of range or non-monotonic before anything starts.
//!
//! # Usage
//!
//! ```rust,ignore
//! use admission_engine::config::load_config;
//!
//! let config = load_config(None)?; // defaults to "config.yaml"
//! println!("mode: {}", config.brokers.mode);
//! ```

mod breaker;
mod brokers;
mod checkpoint;
mod gates;
mod killswitch;
mod observability;
mod positions;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use breaker::BreakerConfig;
pub use brokers::{BackendConfig, BrokersConfig, RetryConfig};
pub use checkpoint::CheckpointConfig;
pub use gates::GatesConfig;
pub use killswitch::KillSwitchConfig;
pub use observability::{LoggingConfig, ObservabilityConfig};
pub use positions::{PositionsConfig, TierRulesConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker backends, mode, and retry policy.
    #[serde(default)]
    pub brokers: BrokersConfig,
    /// Drawdown circuit-breaker tiers and policy.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Gate thresholds and timeouts.
    #[serde(default)]
    pub gates: GatesConfig,
    /// Kill-switch activation surfaces.
    #[serde(default)]
    pub killswitch: KillSwitchConfig,
    /// Checkpoint store location and freshness.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Per-tier exit rules and scan interval.
    #[serde(default)]
    pub positions: PositionsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Bypass the duplicate-execution guard. Never bypasses the kill switch
    /// or the circuit breaker.
    #[serde(default)]
    pub force: bool,
}

/// Load configuration from a YAML file with environment interpolation.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or
/// validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;
    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate `${VAR}` and `${VAR:-default}` patterns.
#[allow(clippy::expect_used)] // the regex is a compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    let mut result = input.to_string();
    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_match.as_str()) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };
        result = result.replace(full_match.as_str(), &value);
    }
    result
}

fn in_unit_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

/// Convert a validated config float into a `Decimal`.
pub(crate) fn to_decimal(value: f64, field: &str) -> Result<rust_decimal::Decimal, ConfigError> {
    rust_decimal::Decimal::try_from(value)
        .map_err(|e| ConfigError::ValidationError(format!("{field}: {e}")))
}

/// Validate configuration values.
///
/// # Errors
///
/// [`ConfigError::ValidationError`] naming the first offending field.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let valid_modes = ["paper", "live"];
    if !valid_modes.contains(&config.brokers.mode.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "brokers.mode must be one of: {valid_modes:?}"
        )));
    }
    if config.brokers.backends.is_empty() {
        return Err(ConfigError::ValidationError(
            "brokers.backends must list at least one backend".to_string(),
        ));
    }
    if config.brokers.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "brokers.retry.max_attempts must be at least 1".to_string(),
        ));
    }
    if config.brokers.account_freshness_secs == 0 {
        return Err(ConfigError::ValidationError(
            "brokers.account_freshness_secs must be positive".to_string(),
        ));
    }

    for (name, value) in [
        ("gates.momentum_threshold", config.gates.momentum_threshold),
        (
            "gates.confidence_threshold",
            config.gates.confidence_threshold,
        ),
        ("gates.sentiment_threshold", config.gates.sentiment_threshold),
    ] {
        if !in_unit_range(value) {
            return Err(ConfigError::ValidationError(format!(
                "{name} must be between 0.0 and 1.0"
            )));
        }
    }
    if config.gates.timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "gates.timeout_ms must be positive".to_string(),
        ));
    }

    let tiers = [
        ("breaker.level1_drawdown", config.breaker.level1_drawdown),
        ("breaker.level2_drawdown", config.breaker.level2_drawdown),
        ("breaker.level3_drawdown", config.breaker.level3_drawdown),
        ("breaker.level4_drawdown", config.breaker.level4_drawdown),
        ("breaker.level5_drawdown", config.breaker.level5_drawdown),
    ];
    for (name, value) in tiers {
        if !in_unit_range(value) {
            return Err(ConfigError::ValidationError(format!(
                "{name} must be between 0.0 and 1.0"
            )));
        }
    }
    for window in tiers.windows(2) {
        if window[1].1 <= window[0].1 {
            return Err(ConfigError::ValidationError(format!(
                "breaker tier thresholds must be strictly increasing ({} >= {})",
                window[0].0, window[1].0
            )));
        }
    }
    if !in_unit_range(config.breaker.loss_streak_multiplier) {
        return Err(ConfigError::ValidationError(
            "breaker.loss_streak_multiplier must be between 0.0 and 1.0".to_string(),
        ));
    }

    if config.checkpoint.freshness_secs == 0 {
        return Err(ConfigError::ValidationError(
            "checkpoint.freshness_secs must be positive".to_string(),
        ));
    }

    for (tier, rules) in [
        ("core", &config.positions.core),
        ("growth", &config.positions.growth),
        ("options", &config.positions.options),
    ] {
        for (field, value) in [
            ("stop_loss_pct", rules.stop_loss_pct),
            ("take_profit_pct", rules.take_profit_pct),
        ] {
            if let Some(v) = value {
                if v <= 0.0 || v > 1.0 {
                    return Err(ConfigError::ValidationError(format!(
                        "positions.{tier}.{field} must be in (0.0, 1.0]"
                    )));
                }
            }
        }
        if rules.max_holding_days.is_some_and(|d| d <= 0) {
            return Err(ConfigError::ValidationError(format!(
                "positions.{tier}.max_holding_days must be positive"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_runnable_paper_mode() {
        let config = load_config_from_string("{}").unwrap();

        assert_eq!(config.brokers.mode, "paper");
        assert!(!config.brokers.backends.is_empty());
        assert!(!config.force);
        assert!((config.gates.momentum_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.checkpoint.dir, "checkpoints");
        assert_eq!(config.observability.logging.level, "info");
    }

    #[test]
    fn test_full_config_parse() {
        let yaml = r#"
brokers:
  mode: live
  backends:
    - name: "alpha"
    - name: "bravo"
  health_check_interval_secs: 15
  retry:
    max_attempts: 5
    initial_backoff_ms: 50

breaker:
  level1_drawdown: 0.01
  level2_drawdown: 0.03
  level3_drawdown: 0.06
  level4_drawdown: 0.12
  level5_drawdown: 0.25
  cooldown_secs: 43200

gates:
  momentum_threshold: 0.7
  timeout_ms: 2000
  min_order_notional: 50

killswitch:
  sentinel_path: "/var/run/halt"
  env_flag: "TRADING_HALT"

checkpoint:
  dir: "/var/lib/admission/runs"
  freshness_secs: 900

positions:
  scan_interval_secs: 30
  growth:
    stop_loss_pct: 0.05
    take_profit_pct: 0.15
    max_holding_days: 21

observability:
  logging:
    level: "debug"
    format: "pretty"

force: true
"#;

        let config = load_config_from_string(yaml).unwrap();

        assert_eq!(config.brokers.mode, "live");
        assert_eq!(config.brokers.backends.len(), 2);
        assert_eq!(config.brokers.backends[1].name, "bravo");
        assert_eq!(config.brokers.retry.max_attempts, 5);
        assert!((config.breaker.level3_drawdown - 0.06).abs() < f64::EPSILON);
        assert!((config.gates.momentum_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.killswitch.sentinel_path.as_deref(), Some("/var/run/halt"));
        assert_eq!(config.checkpoint.freshness_secs, 900);
        assert_eq!(config.positions.growth.max_holding_days, Some(21));
        assert_eq!(config.observability.logging.format, "pretty");
        assert!(config.force);
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        let input = "mode: ${KEEL_CONFIG_TEST_NONEXISTENT_VAR:-paper}";
        assert_eq!(interpolate_env_vars(input), "mode: paper");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)] // ${...} is env var syntax
    fn test_env_var_with_default_uses_existing() {
        let input = "path: ${PATH:-default}";
        let result = interpolate_env_vars(input);
        assert_ne!(result, "path: default");
        assert!(result.starts_with("path: "));
    }

    #[test]
    fn test_env_var_without_default_becomes_empty() {
        let input = "key: ${KEEL_CONFIG_TEST_UNLIKELY_TO_EXIST}";
        assert_eq!(interpolate_env_vars(input), "key: ");
    }

    #[test]
    fn test_validation_rejects_non_monotonic_tiers() {
        let yaml = r"
breaker:
  level2_drawdown: 0.08
  level3_drawdown: 0.05
";
        let err = load_config_from_string(yaml).unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn test_validation_rejects_out_of_range_threshold() {
        let yaml = r"
gates:
  momentum_threshold: 1.5
";
        let err = load_config_from_string(yaml).unwrap_err();
        assert!(err.to_string().contains("momentum_threshold"));
    }

    #[test]
    fn test_validation_rejects_empty_backends() {
        let yaml = r"
brokers:
  backends: []
";
        let err = load_config_from_string(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one backend"));
    }

    #[test]
    fn test_validation_rejects_invalid_mode() {
        let yaml = r"
brokers:
  mode: dry-run
";
        let err = load_config_from_string(yaml).unwrap_err();
        assert!(err.to_string().contains("mode"));
    }
}
