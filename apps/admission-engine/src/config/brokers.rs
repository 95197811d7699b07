//! Broker backend configuration: priority list, mode, retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::RetryPolicy;

/// Broker layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokersConfig {
    /// `paper` or `live`; selects which credentials the backends load.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Backends in failover priority order (first = preferred).
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
    /// Health probe interval.
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    /// Maximum age of an account snapshot before sizing refuses to use it.
    #[serde(default = "default_account_freshness")]
    pub account_freshness_secs: u64,
    /// Retry policy for transient broker failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for BrokersConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            backends: default_backends(),
            health_check_interval_secs: default_health_interval(),
            account_freshness_secs: default_account_freshness(),
            retry: RetryConfig::default(),
        }
    }
}

/// One broker backend entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend name; must be unique, used as the health-registry key.
    pub name: String,
}

/// Retry settings for broker calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts per backend.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff duration in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Exponential growth factor.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter factor (0.2 = ±20%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Convert into the broker layer's retry policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

fn default_mode() -> String {
    "paper".to_string()
}

fn default_backends() -> Vec<BackendConfig> {
    vec![BackendConfig {
        name: "paper".to_string(),
    }]
}

const fn default_health_interval() -> u64 {
    30
}

const fn default_account_freshness() -> u64 {
    60
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    100
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.2
}
