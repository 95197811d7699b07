//! Gate threshold and timeout configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, to_decimal};
use crate::pipeline::GateParams;

/// Gate pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesConfig {
    /// Momentum gate threshold (inclusive pass).
    #[serde(default = "default_momentum")]
    pub momentum_threshold: f64,
    /// Model-confidence gate threshold.
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f64,
    /// Sentiment gate threshold.
    #[serde(default = "default_sentiment")]
    pub sentiment_threshold: f64,
    /// Per-gate scorer timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Smallest order the risk-sizing gate lets through.
    #[serde(default = "default_min_order_notional")]
    pub min_order_notional: f64,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            momentum_threshold: default_momentum(),
            confidence_threshold: default_confidence(),
            sentiment_threshold: default_sentiment(),
            timeout_ms: default_timeout_ms(),
            min_order_notional: default_min_order_notional(),
        }
    }
}

impl GatesConfig {
    /// Convert into gate parameters.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] on a non-finite notional.
    pub fn to_params(&self) -> Result<GateParams, ConfigError> {
        Ok(GateParams {
            momentum_threshold: self.momentum_threshold,
            confidence_threshold: self.confidence_threshold,
            sentiment_threshold: self.sentiment_threshold,
            timeout: Duration::from_millis(self.timeout_ms),
            min_order_notional: to_decimal(self.min_order_notional, "gates.min_order_notional")?,
        })
    }
}

const fn default_momentum() -> f64 {
    0.6
}

const fn default_confidence() -> f64 {
    0.55
}

const fn default_sentiment() -> f64 {
    0.4
}

const fn default_timeout_ms() -> u64 {
    5000
}

const fn default_min_order_notional() -> f64 {
    1.0
}
