//! Broker abstraction layer.
//!
//! A uniform order/account/health interface over N interchangeable backends,
//! plus the health tracking and failover routing built on top of it. The
//! concrete wire protocol of any real backend lives outside this crate;
//! backends implement [`Broker`] and get registered with the router in
//! priority order.

pub mod health;
pub mod paper;
pub mod retry;
pub mod router;

pub use health::{BrokerHealth, HealthMonitor, HealthRegistry, HealthStatus};
pub use paper::PaperBroker;
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use router::{BrokerRouter, RouterError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::OrderSide;

/// An order handed to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client order ID (the pipeline run ID or position ID).
    pub client_order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Notional to execute.
    pub notional: Decimal,
}

/// Backend-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted by the backend, not yet filled.
    Accepted,
    /// Fully filled.
    Filled,
}

/// Result of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Backend-assigned order ID.
    pub broker_order_id: String,
    /// Client order ID echoed back.
    pub client_order_id: String,
    /// Order status.
    pub status: OrderStatus,
    /// Fill price, when filled.
    pub fill_price: Option<Decimal>,
    /// Name of the backend that executed the order.
    pub broker: String,
}

/// Point-in-time account state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Total account equity.
    pub equity: Decimal,
    /// Settled cash.
    pub cash: Decimal,
    /// Available buying power.
    pub buying_power: Decimal,
    /// When the snapshot was taken.
    pub as_of: DateTime<Utc>,
}

impl AccountSnapshot {
    /// Whether the snapshot is younger than `max_age_secs` as of `now`.
    ///
    /// Readers must reject stale account state rather than trust it.
    #[must_use]
    pub fn is_fresh(&self, max_age_secs: u64, now: DateTime<Utc>) -> bool {
        let age = now - self.as_of;
        age <= chrono::Duration::seconds(i64::try_from(max_age_secs).unwrap_or(i64::MAX))
    }
}

/// Errors a backend can return.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Transport-level failure; retryable on the same backend.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// The call did not complete in time; retryable.
    #[error("broker call timed out")]
    Timeout,

    /// Backend throttled the call; retryable after backoff.
    #[error("rate limited by broker")]
    RateLimited,

    /// Backend definitively rejected the order; never retried.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Account cannot cover the order; never retried.
    #[error("insufficient buying power")]
    InsufficientFunds,
}

impl BrokerError {
    /// Whether retrying the same backend can help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout | Self::RateLimited)
    }
}

/// Capability interface implemented once per backend.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Backend name (stable; used as the health-registry key).
    fn name(&self) -> &str;

    /// Submit an order.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, BrokerError>;

    /// Fetch the current account snapshot.
    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError>;

    /// Probe backend connectivity.
    async fn health_check(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_retryability() {
        assert!(BrokerError::Connection("reset".into()).is_retryable());
        assert!(BrokerError::Timeout.is_retryable());
        assert!(BrokerError::RateLimited.is_retryable());
        assert!(!BrokerError::Rejected("bad symbol".into()).is_retryable());
        assert!(!BrokerError::InsufficientFunds.is_retryable());
    }

    #[test]
    fn test_account_freshness() {
        let snapshot = AccountSnapshot {
            equity: dec!(100000),
            cash: dec!(40000),
            buying_power: dec!(80000),
            as_of: Utc::now() - chrono::Duration::seconds(30),
        };

        assert!(snapshot.is_fresh(60, Utc::now()));
        assert!(!snapshot.is_fresh(10, Utc::now()));
    }
}
