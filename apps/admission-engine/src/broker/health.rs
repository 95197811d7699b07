//! Per-backend health tracking and the polling monitor.
//!
//! Health is updated from two places: the periodic probe loop and the result
//! of every order attempt. Status rules:
//!
//! - `Failing` requires ≥3 consecutive failures, or a success rate below 50%
//!   over at least 10 recorded calls.
//! - A `Failing` backend recovers to `Healthy` only on a recorded success
//!   (a probe passing), never on time passage alone.
//! - `Degraded` covers a backend with recent failures that is not yet
//!   `Failing`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::Broker;

/// Consecutive failures that flip a backend to `Failing`.
const FAILING_CONSECUTIVE: u32 = 3;
/// Minimum recorded calls before the success-rate rule applies.
const MIN_SAMPLE: usize = 10;
/// Success rate below which a sampled backend is `Failing`.
const FAILING_SUCCESS_RATE: f64 = 0.5;
/// Rolling window of recorded call outcomes.
const WINDOW_SIZE: usize = 50;

/// Health status of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Backend is taking calls normally.
    Healthy,
    /// Recent failures, still usable.
    Degraded,
    /// Backend is skipped by the router until a probe succeeds.
    Failing,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failing => write!(f, "failing"),
        }
    }
}

/// Rolling health record for one backend.
#[derive(Debug, Clone)]
pub struct BrokerHealth {
    /// Total recorded successes.
    pub successes: u64,
    /// Total recorded failures.
    pub failures: u64,
    /// Current consecutive-failure count.
    pub consecutive_failures: u32,
    /// Last time an outcome was recorded.
    pub last_check: Option<DateTime<Utc>>,
    /// Current status.
    pub status: HealthStatus,
    /// Rolling window of outcomes (true = success).
    window: VecDeque<bool>,
}

impl Default for BrokerHealth {
    fn default() -> Self {
        Self {
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            last_check: None,
            status: HealthStatus::Healthy,
            window: VecDeque::new(),
        }
    }
}

impl BrokerHealth {
    /// Success rate over the rolling window (1.0 when empty).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let ok = self.window.iter().filter(|s| **s).count();
        ok as f64 / self.window.len() as f64
    }

    fn record(&mut self, success: bool, now: DateTime<Utc>) {
        self.last_check = Some(now);

        if success {
            self.successes += 1;
            self.consecutive_failures = 0;
            if self.status == HealthStatus::Failing {
                // Probe success is the only way back from Failing; the
                // window restarts so stale failures don't re-trip the rate
                // rule immediately.
                self.window.clear();
            }
        } else {
            self.failures += 1;
            self.consecutive_failures += 1;
        }

        self.window.push_back(success);
        while self.window.len() > WINDOW_SIZE {
            self.window.pop_front();
        }

        self.status = self.derive_status();
    }

    fn derive_status(&self) -> HealthStatus {
        if self.consecutive_failures >= FAILING_CONSECUTIVE
            || (self.window.len() >= MIN_SAMPLE && self.success_rate() < FAILING_SUCCESS_RATE)
        {
            HealthStatus::Failing
        } else if self.consecutive_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Shared health map for all backends.
///
/// The only globally shared mutable broker state; writes are serialized
/// through the inner lock (single-writer discipline), reads are concurrent.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    backends: RwLock<HashMap<String, BrokerHealth>>,
}

impl HealthRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend (idempotent); starts `Healthy`.
    pub fn register(&self, name: impl Into<String>) {
        let mut backends = self
            .backends
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        backends.entry(name.into()).or_default();
    }

    /// Record a successful call or probe.
    pub fn record_success(&self, name: &str) {
        self.record(name, true);
    }

    /// Record a failed call or probe.
    pub fn record_failure(&self, name: &str) {
        self.record(name, false);
    }

    fn record(&self, name: &str, success: bool) {
        let mut backends = self
            .backends
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = backends.entry(name.to_string()).or_default();
        let previous = entry.status;
        entry.record(success, Utc::now());
        if entry.status != previous {
            tracing::warn!(
                broker = name,
                from = %previous,
                to = %entry.status,
                consecutive_failures = entry.consecutive_failures,
                success_rate = entry.success_rate(),
                "Broker health status changed"
            );
        }
    }

    /// Current status of a backend (`Healthy` if never recorded).
    #[must_use]
    pub fn status(&self, name: &str) -> HealthStatus {
        self.backends
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .map_or(HealthStatus::Healthy, |h| h.status)
    }

    /// Whether any of the given backends is not `Failing`.
    #[must_use]
    pub fn any_usable<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names
            .into_iter()
            .any(|name| self.status(name) != HealthStatus::Failing)
    }

    /// Snapshot of all health records.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, BrokerHealth> {
        self.backends
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

/// Background probe loop over every registered backend.
pub struct HealthMonitor {
    backends: Vec<Arc<dyn Broker>>,
    registry: Arc<HealthRegistry>,
    interval: Duration,
}

impl HealthMonitor {
    /// Create a monitor polling `backends` every `interval`.
    #[must_use]
    pub fn new(
        backends: Vec<Arc<dyn Broker>>,
        registry: Arc<HealthRegistry>,
        interval: Duration,
    ) -> Self {
        for backend in &backends {
            registry.register(backend.name());
        }
        Self {
            backends,
            registry,
            interval,
        }
    }

    /// Run the probe loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        tracing::info!(
            backends = self.backends.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Broker health monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for backend in &self.backends {
                        match backend.health_check().await {
                            Ok(()) => self.registry.record_success(backend.name()),
                            Err(e) => {
                                tracing::warn!(broker = backend.name(), error = %e, "Health probe failed");
                                self.registry.record_failure(backend.name());
                            }
                        }
                    }
                }
                () = cancel.cancelled() => {
                    tracing::info!("Broker health monitor shutting down");
                    break;
                }
            }
        }
    }
}
