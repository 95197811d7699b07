//! Admission Engine Binary
//!
//! Starts the Keel admission engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin admission-engine -- [config.yaml]
//! ```
//!
//! # Environment Variables
//!
//! - `KEEL_KILL_SWITCH`: Set to `1` or `true` to halt all trading
//! - `RUST_LOG`: Log level override (default: from config)

use std::sync::{Arc, RwLock};
use std::time::Duration;

use admission_engine::breaker::{BreakerTier, DrawdownBreaker};
use admission_engine::broker::{Broker, BrokerRouter, HealthMonitor, HealthRegistry, PaperBroker};
use admission_engine::checkpoint::{CheckpointStore, StateStore};
use admission_engine::config::{Config, ConfigError, load_config};
use admission_engine::engine::AdmissionEngine;
use admission_engine::killswitch::KillSwitch;
use admission_engine::models::TradeCandidate;
use admission_engine::pipeline::{GatePipeline, standard_gates};
use admission_engine::positions::PositionManager;
use admission_engine::telemetry::init_telemetry;
use anyhow::Context;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the candidate intake channel.
const INTAKE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = parse_config()?;
    init_telemetry(&config.observability.logging);

    tracing::info!("Starting Keel Admission Engine");
    log_config(&config);

    let state = create_state_store(&config)?;
    let killswitch = create_killswitch(&config, &state)?;
    let breaker = create_breaker(&config, &state)?;
    let store = create_store(&config)?;
    let backends = create_backends(&config);
    let registry = Arc::new(HealthRegistry::new());
    let router = Arc::new(BrokerRouter::new(
        backends.clone(),
        Arc::clone(&registry),
        config.brokers.retry.to_policy(),
        Arc::clone(&killswitch),
        Duration::from_secs(config.brokers.account_freshness_secs),
    ));
    let positions = Arc::new(PositionManager::new(
        config.positions.to_policy().context("exit policy")?,
    ));

    let pipeline = GatePipeline::new(
        standard_gates(&config.gates.to_params().context("gate parameters")?),
        Arc::clone(&killswitch),
        Arc::clone(&breaker),
        Arc::clone(&store),
        Arc::clone(&router),
    );
    let engine = Arc::new(AdmissionEngine::new(
        pipeline,
        killswitch,
        breaker,
        router,
        store,
        state,
        positions,
        config.force,
    ));

    let shutdown = CancellationToken::new();

    let monitor = HealthMonitor::new(
        backends,
        registry,
        Duration::from_secs(config.brokers.health_check_interval_secs),
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown.clone()));

    // The intake sender stays alive for the life of the process; candidate
    // sources hand trades to the engine through it.
    let (_intake_tx, intake_rx) = mpsc::channel::<TradeCandidate>(INTAKE_CAPACITY);
    let engine_handle = {
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        let scan_interval = Duration::from_secs(config.positions.scan_interval_secs);
        tokio::spawn(async move { engine.run(intake_rx, scan_interval, shutdown).await })
    };

    tracing::info!("Admission engine ready");

    shutdown_signal().await;
    shutdown.cancel();

    let _ = engine_handle.await;
    let _ = monitor_handle.await;

    tracing::info!("Admission engine stopped");
    Ok(())
}

/// Load configuration from the path given on the command line, falling back
/// to defaults when no path was given and `config.yaml` does not exist.
fn parse_config() -> anyhow::Result<Config> {
    let path = std::env::args().nth(1);
    match load_config(path.as_deref()) {
        Ok(config) => Ok(config),
        Err(ConfigError::ReadError { ref source, .. })
            if path.is_none() && source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(Config::default())
        }
        Err(e) => Err(e).context("loading configuration"),
    }
}

/// Log the effective configuration.
fn log_config(config: &Config) {
    tracing::info!(
        mode = %config.brokers.mode,
        backends = config.brokers.backends.len(),
        checkpoint_dir = %config.checkpoint.dir,
        scan_interval_secs = config.positions.scan_interval_secs,
        force = config.force,
        "Configuration loaded"
    );
}

/// Open the state store holding breaker and kill-switch state.
fn create_state_store(config: &Config) -> anyhow::Result<Arc<StateStore>> {
    let dir = std::path::Path::new(&config.checkpoint.dir).join("state");
    let store =
        StateStore::open(dir, config.checkpoint.freshness_secs).context("opening state store")?;
    Ok(Arc::new(store))
}

/// Create the kill switch, restoring persisted state when present.
fn create_killswitch(config: &Config, state: &StateStore) -> anyhow::Result<Arc<KillSwitch>> {
    let sentinel = config.killswitch.sentinel_path.clone().map(Into::into);
    let env_flag = config.killswitch.env_flag.clone();

    let switch = match state.load_kill_switch().context("kill-switch state")? {
        Some(persisted) => {
            if let Some(reason) = &persisted.state.programmatic_reason {
                tracing::warn!(
                    reason = %reason,
                    saved_at = %persisted.saved_at,
                    "Restored kill switch is still active"
                );
            }
            KillSwitch::with_state(sentinel, env_flag, persisted.state)
        }
        None => KillSwitch::new(sentinel, env_flag),
    };
    Ok(Arc::new(switch))
}

/// Create the drawdown circuit breaker, restoring persisted state.
///
/// Stale state below the halted tiers is discarded; a halted tier is
/// restored no matter how old the document is, since a hard stop must not
/// be cleared by a restart.
fn create_breaker(
    config: &Config,
    state: &StateStore,
) -> anyhow::Result<Arc<RwLock<DrawdownBreaker>>> {
    let policy = config.breaker.to_policy().context("breaker policy")?;
    let breaker = match state.load_breaker().context("circuit-breaker state")? {
        Some(persisted) if persisted.fresh || persisted.state.is_halted() => {
            tracing::info!(
                tier = %persisted.state.tier,
                saved_at = %persisted.saved_at,
                "Restored circuit-breaker state"
            );
            if persisted.state.tier >= BreakerTier::Level5 {
                tracing::warn!("Circuit breaker is hard-stopped; a manual reset is required");
            }
            DrawdownBreaker::with_state(policy, persisted.state)
        }
        Some(persisted) => {
            tracing::warn!(
                tier = %persisted.state.tier,
                saved_at = %persisted.saved_at,
                "Discarding stale circuit-breaker state"
            );
            DrawdownBreaker::new(policy)
        }
        None => DrawdownBreaker::new(policy),
    };
    Ok(Arc::new(RwLock::new(breaker)))
}

/// Open the checkpoint store.
fn create_store(config: &Config) -> anyhow::Result<Arc<CheckpointStore>> {
    let store = CheckpointStore::open(
        config.checkpoint.dir.clone(),
        config.checkpoint.freshness_secs,
    )
    .context("opening checkpoint store")?;
    Ok(Arc::new(store))
}

/// Create the configured broker backends, in priority order.
///
/// Live broker adapters live outside this crate; every configured backend
/// runs on the in-process paper implementation.
fn create_backends(config: &Config) -> Vec<Arc<dyn Broker>> {
    config
        .brokers
        .backends
        .iter()
        .map(|backend| {
            tracing::info!(broker = %backend.name, "Broker backend initialized");
            Arc::new(PaperBroker::new(backend.name.clone())) as Arc<dyn Broker>
        })
        .collect()
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; a process that cannot
/// respond to termination signals should fail fast at startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
