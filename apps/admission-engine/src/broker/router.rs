//! Health-aware failover routing across broker backends.
//!
//! Backends are held in priority order. A submit walks the list, skipping
//! `Failing` backends, retrying transient failures on the same backend with
//! jittered backoff, and failing over once the retry ceiling is hit or the
//! backend flips to `Failing` mid-attempt. This is a per-backend circuit
//! breaker, distinct from the portfolio-level drawdown breaker.
//!
//! The kill switch is re-checked before every attempt: an activation that
//! lands mid-backoff denies the submission before another broker call is
//! made.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use super::{
    AccountSnapshot, Broker, BrokerError, ExponentialBackoff, HealthRegistry, HealthStatus,
    OrderRequest, OrderResult, RetryPolicy,
};
use crate::killswitch::KillSwitch;

/// Routing errors.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// Every backend is `Failing` or exhausted its retries.
    #[error("no broker available")]
    NoBrokerAvailable,

    /// The kill switch denied the call before submission.
    #[error("kill switch active: {reason}")]
    KillSwitchActive {
        /// Reason reported by the active source.
        reason: String,
    },

    /// A backend definitively rejected the order; not retried elsewhere.
    #[error("order rejected by {broker}: {source}")]
    Rejected {
        /// Backend that rejected.
        broker: String,
        /// The underlying rejection.
        source: BrokerError,
    },
}

/// Priority-ordered failover router.
pub struct BrokerRouter {
    backends: Vec<Arc<dyn Broker>>,
    registry: Arc<HealthRegistry>,
    policy: RetryPolicy,
    killswitch: Arc<KillSwitch>,
    /// Maximum age of an account snapshot before it is rejected as stale.
    account_freshness: Duration,
}

impl BrokerRouter {
    /// Create a router over `backends` (highest priority first).
    #[must_use]
    pub fn new(
        backends: Vec<Arc<dyn Broker>>,
        registry: Arc<HealthRegistry>,
        policy: RetryPolicy,
        killswitch: Arc<KillSwitch>,
        account_freshness: Duration,
    ) -> Self {
        for backend in &backends {
            registry.register(backend.name());
        }
        Self {
            backends,
            registry,
            policy,
            killswitch,
            account_freshness,
        }
    }

    /// Whether at least one backend is currently usable.
    #[must_use]
    pub fn has_usable_backend(&self) -> bool {
        self.backends
            .iter()
            .any(|b| self.registry.status(b.name()) != HealthStatus::Failing)
    }

    /// Shared health registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Submit an order to the highest-priority usable backend, with retry
    /// and failover.
    ///
    /// # Errors
    ///
    /// - [`RouterError::KillSwitchActive`] if the switch activates at any
    ///   point before a broker call.
    /// - [`RouterError::Rejected`] on a definitive broker rejection.
    /// - [`RouterError::NoBrokerAvailable`] when every backend is down.
    pub async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, RouterError> {
        for backend in &self.backends {
            let name = backend.name();
            if self.registry.status(name) == HealthStatus::Failing {
                tracing::debug!(broker = name, "Skipping failing backend");
                continue;
            }

            match self.try_backend(backend.as_ref(), request).await? {
                Some(result) => return Ok(result),
                None => {
                    tracing::warn!(
                        broker = name,
                        symbol = %request.symbol,
                        "Backend exhausted, failing over"
                    );
                }
            }
        }

        tracing::error!(
            symbol = %request.symbol,
            client_order_id = %request.client_order_id,
            "No broker available for order"
        );
        Err(RouterError::NoBrokerAvailable)
    }

    /// Try one backend to exhaustion. `Ok(None)` means fail over.
    async fn try_backend(
        &self,
        backend: &dyn Broker,
        request: &OrderRequest,
    ) -> Result<Option<OrderResult>, RouterError> {
        let name = backend.name();
        let mut backoff = ExponentialBackoff::new(&self.policy);

        loop {
            // Fresh check at every suspension point, never cached.
            let status = self.killswitch.status();
            if status.active {
                return Err(RouterError::KillSwitchActive {
                    reason: status.reason.unwrap_or_else(|| "unknown".to_string()),
                });
            }

            match backend.submit_order(request).await {
                Ok(result) => {
                    self.registry.record_success(name);
                    tracing::info!(
                        broker = name,
                        broker_order_id = %result.broker_order_id,
                        symbol = %request.symbol,
                        notional = %request.notional,
                        "Order submitted"
                    );
                    return Ok(Some(result));
                }
                Err(e) if e.is_retryable() => {
                    self.registry.record_failure(name);
                    tracing::warn!(
                        broker = name,
                        error = %e,
                        attempt = backoff.attempts() + 1,
                        "Transient broker failure"
                    );

                    if self.registry.status(name) == HealthStatus::Failing {
                        return Ok(None);
                    }
                    match backoff.next_backoff() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return Ok(None),
                    }
                }
                Err(e) => {
                    // Definitive rejection: the backend is working, the
                    // order is not. No failover.
                    return Err(RouterError::Rejected {
                        broker: name.to_string(),
                        source: e,
                    });
                }
            }
        }
    }

    /// Fetch the account snapshot from the highest-priority usable backend.
    ///
    /// A snapshot older than the configured freshness window is treated as a
    /// backend failure: sizing decisions must never trust stale balances.
    ///
    /// # Errors
    ///
    /// [`RouterError::NoBrokerAvailable`] when no backend answers with a
    /// fresh snapshot.
    pub async fn get_account(&self) -> Result<AccountSnapshot, RouterError> {
        for backend in &self.backends {
            let name = backend.name();
            if self.registry.status(name) == HealthStatus::Failing {
                continue;
            }
            match backend.get_account().await {
                Ok(snapshot) => {
                    if !snapshot.is_fresh(self.account_freshness.as_secs(), Utc::now()) {
                        self.registry.record_failure(name);
                        tracing::warn!(
                            broker = name,
                            as_of = %snapshot.as_of,
                            "Stale account snapshot, trying next backend"
                        );
                        continue;
                    }
                    self.registry.record_success(name);
                    return Ok(snapshot);
                }
                Err(e) => {
                    self.registry.record_failure(name);
                    tracing::warn!(broker = name, error = %e, "Account fetch failed");
                }
            }
        }
        Err(RouterError::NoBrokerAvailable)
    }
}
