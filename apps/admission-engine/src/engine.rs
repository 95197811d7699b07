//! Engine control loops and shared-state wiring.
//!
//! The engine owns the shared state every component reads (kill switch,
//! breaker, health registry, open positions) and runs the control loops:
//! candidate intake from an mpsc channel, periodic position scanning, and
//! periodic portfolio-metric refresh. Broker health polling runs in its own
//! [`crate::broker::HealthMonitor`] task. All loops stop together through
//! one `CancellationToken`.
//!
//! The force flag bypasses exactly one check, the duplicate-execution
//! guard. Kill switch and circuit breaker apply to forced candidates like
//! any other.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::breaker::{DrawdownBreaker, PortfolioMetrics};
use crate::broker::{BrokerRouter, OrderRequest};
use crate::checkpoint::{CheckpointStore, StateStore};
use crate::killswitch::KillSwitch;
use crate::models::{
    CloseOrder, CloseReason, OrderSide, PipelineRun, Position, ReasonCode, RunContext, RunState,
    TradeCandidate,
};
use crate::pipeline::{AdmissionOutcome, GateContext, GatePipeline, PipelineError};
use crate::positions::PositionManager;

/// The admission engine.
pub struct AdmissionEngine {
    pipeline: GatePipeline,
    killswitch: Arc<KillSwitch>,
    breaker: Arc<RwLock<DrawdownBreaker>>,
    router: Arc<BrokerRouter>,
    store: Arc<CheckpointStore>,
    state: Arc<StateStore>,
    positions: Arc<PositionManager>,
    /// Trailing peak equity for drawdown computation.
    peak_equity: RwLock<Decimal>,
    force: bool,
}

impl AdmissionEngine {
    /// Wire an engine from its components.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: GatePipeline,
        killswitch: Arc<KillSwitch>,
        breaker: Arc<RwLock<DrawdownBreaker>>,
        router: Arc<BrokerRouter>,
        store: Arc<CheckpointStore>,
        state: Arc<StateStore>,
        positions: Arc<PositionManager>,
        force: bool,
    ) -> Self {
        Self {
            pipeline,
            killswitch,
            breaker,
            router,
            store,
            state,
            positions,
            peak_equity: RwLock::new(Decimal::ZERO),
            force,
        }
    }

    /// Shared position book.
    #[must_use]
    pub fn positions(&self) -> &Arc<PositionManager> {
        &self.positions
    }

    /// Shared kill switch.
    #[must_use]
    pub fn killswitch(&self) -> &Arc<KillSwitch> {
        &self.killswitch
    }

    /// Take one candidate through the duplicate guard and the pipeline, and
    /// open a position on an admitted fill.
    ///
    /// # Errors
    ///
    /// [`PipelineError`] when the run cannot be durably recorded.
    pub async fn handle_candidate(
        &self,
        candidate: TradeCandidate,
    ) -> Result<AdmissionOutcome, PipelineError> {
        if !self.force && self.store.admitted_today(&candidate.symbol, Utc::now())? {
            tracing::warn!(
                symbol = %candidate.symbol,
                "Duplicate candidate for today, rejecting"
            );
            return self.seal_duplicate(candidate);
        }

        let outcome = self.pipeline.evaluate(candidate).await?;
        if let Some(fill) = &outcome.fill {
            self.open_position(&outcome.run, fill.fill_price);
        }
        Ok(outcome)
    }

    fn seal_duplicate(&self, candidate: TradeCandidate) -> Result<AdmissionOutcome, PipelineError> {
        let restrictions = self
            .breaker
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .restrictions();
        let mut run = PipelineRun::new(
            candidate,
            RunContext {
                size_multiplier: restrictions.size_multiplier,
                buying_power: Decimal::ZERO,
                broker_available: self.router.has_usable_backend(),
            },
        );
        run.seal(RunState::Rejected, Some(ReasonCode::DuplicateCandidate))?;
        self.store.seal(&run)?;
        Ok(AdmissionOutcome { run, fill: None })
    }

    fn open_position(&self, run: &PipelineRun, fill_price: Option<Decimal>) {
        let Some(price) = fill_price.filter(|p| !p.is_zero()) else {
            tracing::warn!(
                run_id = %run.run_id,
                symbol = %run.candidate.symbol,
                "Fill reported no price, not tracking position"
            );
            return;
        };
        let notional = GateContext::from_run(&run.context, &run.verdicts)
            .sized_notional(run.candidate.notional);
        self.positions.open(Position::open(
            run.run_id.clone(),
            run.candidate.symbol.clone(),
            run.candidate.tier,
            notional / price,
            price,
        ));
    }

    /// Scan open positions and submit any close orders due.
    ///
    /// While the breaker sits in a halted tier the per-tier exit rules are
    /// moot: every open position is closed outright. The whole cycle is
    /// skipped while the kill switch is active, and the switch is re-checked
    /// before every individual submission.
    pub async fn scan_positions(&self) {
        if self.killswitch.is_active() {
            tracing::warn!("Kill switch active, skipping position scan");
            return;
        }

        let halted = self
            .breaker
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .restrictions()
            .trading_halted;
        let orders = if halted {
            let orders = self.positions.liquidation_orders(CloseReason::CircuitBreaker);
            if !orders.is_empty() {
                tracing::warn!(
                    count = orders.len(),
                    "Trading halted, closing all open positions"
                );
            }
            orders
        } else {
            self.positions.scan(Utc::now())
        };

        for order in orders {
            if self.killswitch.is_active() {
                tracing::warn!(
                    position_id = %order.position_id,
                    "Kill switch activated mid-scan, abandoning remaining closes"
                );
                return;
            }
            self.submit_close(&order).await;
        }
    }

    async fn submit_close(&self, order: &CloseOrder) {
        let Some(position) = self.positions.get(&order.position_id) else {
            return;
        };
        let request = OrderRequest {
            client_order_id: order.position_id.clone(),
            symbol: order.symbol.clone(),
            side: OrderSide::Sell,
            notional: position.quantity * position.mark_price,
        };

        match self.router.submit_order(&request).await {
            Ok(fill) => {
                let exit_price = fill.fill_price.unwrap_or(position.mark_price);
                if let Some(trade) =
                    self.positions
                        .settle_close(&order.position_id, exit_price, order.reason)
                {
                    self.breaker
                        .write()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .record_trade_result(trade.is_win());
                    self.persist_state();
                }
            }
            Err(e) => {
                tracing::error!(
                    position_id = %order.position_id,
                    symbol = %order.symbol,
                    reason = %order.reason,
                    error = %e,
                    "Close order failed, position stays open for the next scan"
                );
            }
        }
    }

    /// Refresh portfolio metrics from the account and drive the breaker's
    /// scheduled re-evaluation.
    pub async fn refresh_metrics(&self) {
        let Ok(snapshot) = self.router.get_account().await else {
            tracing::warn!("Account unavailable, breaker metrics not refreshed");
            return;
        };

        let peak = {
            let mut peak = self
                .peak_equity
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if snapshot.equity > *peak {
                *peak = snapshot.equity;
            }
            *peak
        };

        let now = Utc::now();
        {
            let mut breaker = self
                .breaker
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            breaker.update(PortfolioMetrics::from_equity(snapshot.equity, peak), now);
            breaker.reevaluate(now);
        }
        self.persist_state();
    }

    /// Write the breaker and kill-switch state to disk.
    ///
    /// A failure here is loud but not fatal: the in-memory state is still
    /// authoritative for the running process.
    fn persist_state(&self) {
        let breaker_state = self
            .breaker
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .state();
        if let Err(e) = self.state.save_breaker(&breaker_state) {
            tracing::error!(error = %e, "Failed to persist circuit-breaker state");
        }
        if let Err(e) = self.state.save_kill_switch(&self.killswitch.state()) {
            tracing::error!(error = %e, "Failed to persist kill-switch state");
        }
    }

    /// Run the intake and scan loops until cancelled.
    pub async fn run(
        &self,
        mut intake: mpsc::Receiver<TradeCandidate>,
        scan_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut scan_tick = tokio::time::interval(scan_interval);
        tracing::info!(
            scan_interval_secs = scan_interval.as_secs(),
            force = self.force,
            "Admission engine started"
        );

        loop {
            tokio::select! {
                candidate = intake.recv() => {
                    let Some(candidate) = candidate else {
                        tracing::info!("Candidate channel closed, stopping");
                        break;
                    };
                    if let Err(e) = self.handle_candidate(candidate).await {
                        tracing::error!(error = %e, "Candidate run failed to record");
                    }
                }
                _ = scan_tick.tick() => {
                    self.refresh_metrics().await;
                    self.scan_positions().await;
                }
                () = cancel.cancelled() => {
                    tracing::info!("Admission engine shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerPolicy;
    use crate::broker::{Broker, HealthRegistry, PaperBroker, RetryPolicy};
    use crate::models::{CloseReason, StrategyTier};
    use crate::pipeline::{GateParams, standard_gates};
    use crate::positions::ExitPolicy;
    use rust_decimal_macros::dec;

    struct TestEngine {
        engine: AdmissionEngine,
        primary: Arc<PaperBroker>,
        killswitch: Arc<KillSwitch>,
        breaker: Arc<RwLock<DrawdownBreaker>>,
        state: Arc<StateStore>,
        _dir: tempfile::TempDir,
    }

    fn engine(force: bool) -> TestEngine {
        let dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(PaperBroker::new("primary"));
        let killswitch = Arc::new(KillSwitch::programmatic_only());
        let breaker = Arc::new(RwLock::new(DrawdownBreaker::new(BreakerPolicy::default())));
        let store = Arc::new(CheckpointStore::open(dir.path(), 3600).unwrap());
        let state = Arc::new(StateStore::open(dir.path().join("state"), 3600).unwrap());
        let router = Arc::new(BrokerRouter::new(
            vec![primary.clone() as Arc<dyn Broker>],
            Arc::new(HealthRegistry::new()),
            RetryPolicy {
                initial_backoff: Duration::from_millis(1),
                jitter: 0.0,
                ..Default::default()
            },
            Arc::clone(&killswitch),
            Duration::from_secs(60),
        ));
        let pipeline = GatePipeline::new(
            standard_gates(&GateParams::default()),
            Arc::clone(&killswitch),
            Arc::clone(&breaker),
            Arc::clone(&store),
            Arc::clone(&router),
        );
        let engine = AdmissionEngine::new(
            pipeline,
            Arc::clone(&killswitch),
            Arc::clone(&breaker),
            router,
            store,
            Arc::clone(&state),
            Arc::new(PositionManager::new(ExitPolicy::default())),
            force,
        );
        TestEngine {
            engine,
            primary,
            killswitch,
            breaker,
            state,
            _dir: dir,
        }
    }

    fn candidate(symbol: &str) -> TradeCandidate {
        TradeCandidate::new(symbol, OrderSide::Buy, dec!(1000), StrategyTier::Growth)
            .with_score("momentum", 0.8, 0.9)
            .with_score("confidence", 0.7, 0.85)
            .with_score("sentiment", 0.6, 0.8)
    }

    #[tokio::test]
    async fn test_admitted_fill_opens_position() {
        let t = engine(false);

        let outcome = t.engine.handle_candidate(candidate("AAPL")).await.unwrap();

        assert_eq!(outcome.run.terminal, Some(RunState::Admitted));
        let positions = t.engine.positions().open_positions();
        assert_eq!(positions.len(), 1);
        // 1000 notional at the paper fill price of 100.
        assert_eq!(positions[0].quantity, dec!(10));
        assert_eq!(positions[0].entry_price, dec!(100));
    }

    #[tokio::test]
    async fn test_duplicate_guard_rejects_second_admission() {
        let t = engine(false);

        t.engine.handle_candidate(candidate("AAPL")).await.unwrap();
        let outcome = t.engine.handle_candidate(candidate("AAPL")).await.unwrap();

        assert_eq!(outcome.run.terminal, Some(RunState::Rejected));
        assert_eq!(
            outcome.run.terminal_reason,
            Some(ReasonCode::DuplicateCandidate)
        );
        assert_eq!(t.primary.submitted_count(), 1);

        // A different symbol is unaffected.
        let other = t.engine.handle_candidate(candidate("MSFT")).await.unwrap();
        assert_eq!(other.run.terminal, Some(RunState::Admitted));
    }

    #[tokio::test]
    async fn test_force_bypasses_duplicate_guard_only() {
        let t = engine(true);

        t.engine.handle_candidate(candidate("AAPL")).await.unwrap();
        let second = t.engine.handle_candidate(candidate("AAPL")).await.unwrap();
        assert_eq!(second.run.terminal, Some(RunState::Admitted));
        assert_eq!(t.primary.submitted_count(), 2);

        // Force never bypasses the kill switch.
        t.killswitch.activate("halt");
        let third = t.engine.handle_candidate(candidate("AAPL")).await.unwrap();
        assert_eq!(third.run.terminal, Some(RunState::AbortedByKillSwitch));
        assert_eq!(t.primary.submitted_count(), 2);
    }

    #[tokio::test]
    async fn test_scan_closes_take_profit_and_feeds_breaker() {
        let t = engine(false);
        t.engine.handle_candidate(candidate("AAPL")).await.unwrap();

        // +15% against the 10% growth target; the close fills at the mark.
        t.engine.positions().mark_price("AAPL", dec!(115));
        t.primary.set_fill_price(dec!(115));
        t.engine.scan_positions().await;

        assert_eq!(t.engine.positions().open_count(), 0);
        let trades = t.engine.positions().closed_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, CloseReason::TakeProfit);
        // Entry order + close order.
        assert_eq!(t.primary.submitted_count(), 2);
        // A winning close keeps the loss streak at zero.
        assert_eq!(t.breaker.read().unwrap().consecutive_losses(), 0);
    }

    #[tokio::test]
    async fn test_losing_close_advances_loss_streak() {
        let t = engine(false);
        t.engine.handle_candidate(candidate("AAPL")).await.unwrap();

        // -4% breaches the 3% growth stop.
        t.engine.positions().mark_price("AAPL", dec!(96));
        t.primary.set_fill_price(dec!(96));
        t.engine.scan_positions().await;

        let trades = t.engine.positions().closed_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, CloseReason::StopLoss);
        assert_eq!(t.breaker.read().unwrap().consecutive_losses(), 1);
    }

    #[tokio::test]
    async fn test_halted_breaker_closes_all_open_positions() {
        let t = engine(false);
        t.engine.handle_candidate(candidate("AAPL")).await.unwrap();
        assert_eq!(t.engine.positions().open_count(), 1);

        // A 12% drawdown lands in Level4: the position is nowhere near an
        // exit rule, but the halt flattens the book anyway.
        t.breaker
            .write()
            .unwrap()
            .update(PortfolioMetrics::from_drawdown(dec!(0.12)), Utc::now());
        assert_eq!(
            t.breaker.read().unwrap().tier(),
            crate::breaker::BreakerTier::Level4
        );
        t.engine.scan_positions().await;

        assert_eq!(t.engine.positions().open_count(), 0);
        let trades = t.engine.positions().closed_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, CloseReason::CircuitBreaker);
        // Entry order + forced close.
        assert_eq!(t.primary.submitted_count(), 2);
    }

    #[tokio::test]
    async fn test_kill_switch_still_blocks_halt_liquidation() {
        let t = engine(false);
        t.engine.handle_candidate(candidate("AAPL")).await.unwrap();

        t.breaker
            .write()
            .unwrap()
            .update(PortfolioMetrics::from_drawdown(dec!(0.12)), Utc::now());
        t.killswitch.activate("halt");
        t.engine.scan_positions().await;

        // The kill switch outranks the breaker: no close order goes out.
        assert_eq!(t.primary.submitted_count(), 1);
        assert_eq!(t.engine.positions().open_count(), 1);
    }

    #[tokio::test]
    async fn test_kill_switch_blocks_close_orders() {
        let t = engine(false);
        t.engine.handle_candidate(candidate("AAPL")).await.unwrap();
        t.engine.positions().mark_price("AAPL", dec!(115));

        t.killswitch.activate("halt");
        t.engine.scan_positions().await;

        // Entry order only; the close was never submitted.
        assert_eq!(t.primary.submitted_count(), 1);
        assert_eq!(t.engine.positions().open_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_metrics_drives_breaker() {
        let t = engine(false);

        // First refresh establishes the peak at the paper equity.
        t.engine.refresh_metrics().await;
        assert_eq!(
            t.breaker.read().unwrap().tier(),
            crate::breaker::BreakerTier::Normal
        );
    }

    #[tokio::test]
    async fn test_breaker_and_kill_switch_state_survive_restart() {
        let t = engine(false);

        // Hard stop plus an operator halt, then a metric refresh persists
        // both.
        t.breaker
            .write()
            .unwrap()
            .update(PortfolioMetrics::from_drawdown(dec!(0.25)), Utc::now());
        t.killswitch.activate("incident");
        t.engine.refresh_metrics().await;

        let persisted = t.state.load_breaker().unwrap().unwrap();
        assert_eq!(persisted.state.tier, crate::breaker::BreakerTier::Level5);
        assert!(persisted.state.is_halted());

        // A rebuilt breaker is still hard-stopped and still needs a manual
        // reset.
        let mut rebuilt = DrawdownBreaker::with_state(BreakerPolicy::default(), persisted.state);
        assert_eq!(
            rebuilt.reevaluate(Utc::now() + chrono::Duration::days(30)),
            crate::breaker::BreakerTier::Level5
        );

        let persisted = t.state.load_kill_switch().unwrap().unwrap();
        let rebuilt_switch = KillSwitch::with_state(None, None, persisted.state);
        assert!(rebuilt_switch.is_active());
    }

    #[tokio::test]
    async fn test_run_loop_processes_candidates_until_cancelled() {
        let t = engine(false);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let engine = Arc::new(t.engine);
        let handle = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run(rx, Duration::from_secs(60), cancel).await })
        };

        tx.send(candidate("AAPL")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(t.primary.submitted_count(), 1);
        assert_eq!(engine.positions().open_count(), 1);
    }
}
