//! In-process paper backend.
//!
//! Fills every order deterministically at a fixed price and keeps a log of
//! what it was asked to do. Failures are scriptable per call, which is what
//! the failover and resilience tests are built on; it also serves as the
//! paper-mode backend since real broker wire protocols live outside this
//! crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{AccountSnapshot, Broker, BrokerError, OrderRequest, OrderResult, OrderStatus};

/// Scriptable in-memory broker backend.
pub struct PaperBroker {
    name: String,
    equity: Decimal,
    cash: Decimal,
    buying_power: Decimal,
    fill_price: Mutex<Decimal>,
    /// Age in seconds applied to the `as_of` of reported account snapshots.
    account_age_secs: AtomicU64,
    healthy: AtomicBool,
    order_seq: AtomicU64,
    /// Errors returned by the next submit calls, in order.
    submit_failures: Mutex<VecDeque<BrokerError>>,
    /// Every request that reached a successful submit.
    submitted: Mutex<Vec<OrderRequest>>,
}

impl PaperBroker {
    /// Create a paper backend with default account balances.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            equity: dec!(100000),
            cash: dec!(50000),
            buying_power: dec!(100000),
            fill_price: Mutex::new(dec!(100)),
            account_age_secs: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            order_seq: AtomicU64::new(0),
            submit_failures: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Override the buying power reported by `get_account`.
    #[must_use]
    pub const fn with_buying_power(mut self, buying_power: Decimal) -> Self {
        self.buying_power = buying_power;
        self
    }

    /// Override the deterministic fill price.
    #[must_use]
    pub fn with_fill_price(self, price: Decimal) -> Self {
        self.set_fill_price(price);
        self
    }

    /// Change the deterministic fill price for subsequent orders.
    pub fn set_fill_price(&self, price: Decimal) {
        *self
            .fill_price
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = price;
    }

    /// Make subsequent account snapshots report an `as_of` this far in the
    /// past.
    pub fn set_account_age_secs(&self, secs: u64) {
        self.account_age_secs.store(secs, Ordering::SeqCst);
    }

    /// Make health probes pass or fail.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Queue an error for the next submit call.
    pub fn fail_next_submit(&self, error: BrokerError) {
        self.submit_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(error);
    }

    /// Queue `n` connection errors for the next submit calls.
    pub fn fail_next_submits(&self, n: usize) {
        let mut failures = self
            .submit_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for _ in 0..n {
            failures.push_back(BrokerError::Connection("injected failure".to_string()));
        }
    }

    /// Orders that reached a successful submit.
    #[must_use]
    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.submitted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of successfully submitted orders.
    #[must_use]
    pub fn submitted_count(&self) -> usize {
        self.submitted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, BrokerError> {
        if let Some(error) = self
            .submit_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
        {
            return Err(error);
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("backend offline".to_string()));
        }

        self.submitted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.clone());

        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst);
        let fill_price = *self
            .fill_price
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(OrderResult {
            broker_order_id: format!("{}-{seq}", self.name),
            client_order_id: request.client_order_id.clone(),
            status: OrderStatus::Filled,
            fill_price: Some(fill_price),
            broker: self.name.clone(),
        })
    }

    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("backend offline".to_string()));
        }
        let age = i64::try_from(self.account_age_secs.load(Ordering::SeqCst)).unwrap_or(i64::MAX);
        Ok(AccountSnapshot {
            equity: self.equity,
            cash: self.cash,
            buying_power: self.buying_power,
            as_of: Utc::now() - chrono::Duration::seconds(age),
        })
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Connection("backend offline".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;

    fn request() -> OrderRequest {
        OrderRequest {
            client_order_id: "run-1".to_string(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            notional: dec!(1000),
        }
    }

    #[tokio::test]
    async fn test_fills_deterministically() {
        let broker = PaperBroker::new("paper").with_fill_price(dec!(42));
        let result = broker.submit_order(&request()).await.unwrap();

        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.fill_price, Some(dec!(42)));
        assert_eq!(result.client_order_id, "run-1");
        assert_eq!(broker.submitted_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_pop_in_order() {
        let broker = PaperBroker::new("paper");
        broker.fail_next_submits(2);

        assert!(broker.submit_order(&request()).await.is_err());
        assert!(broker.submit_order(&request()).await.is_err());
        assert!(broker.submit_order(&request()).await.is_ok());
        // Failed submits never reach the order log.
        assert_eq!(broker.submitted_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_backend_fails_everything() {
        let broker = PaperBroker::new("paper");
        broker.set_healthy(false);

        assert!(broker.health_check().await.is_err());
        assert!(broker.get_account().await.is_err());
        assert!(broker.submit_order(&request()).await.is_err());
    }
}
