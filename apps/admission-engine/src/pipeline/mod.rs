//! The admission pipeline.
//!
//! One run takes a candidate through, in order: a fresh kill-switch check,
//! a circuit-breaker pre-flight, the gate registry (short-circuiting on the
//! first reject, each verdict checkpointed before the next gate runs), a
//! post-gate kill-switch and breaker re-check, and finally order submission
//! through the failover router. Every run seals with a terminal state and
//! reason code, including the ones that never reach a gate.
//!
//! Checkpoint writes are write-ahead and fatal on failure: a run never
//! proceeds past a verdict it could not record.

pub mod context;
pub mod gates;

pub use context::GateContext;
pub use gates::{
    CandidateScores, FeasibilityGate, Gate, GateParams, RiskSizingGate, ScoreError, Scorer,
    ThresholdGate, standard_gates,
};

use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use thiserror::Error;

use crate::breaker::DrawdownBreaker;
use crate::broker::{BrokerError, BrokerRouter, OrderRequest, OrderResult, RouterError};
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::killswitch::KillSwitch;
use crate::models::{PipelineRun, ReasonCode, RunContext, RunSealed, RunState, TradeCandidate};

/// Pipeline failure modes.
///
/// A rejected or aborted candidate is not an error; errors are reserved for
/// faults that leave the run unrecorded or inconsistent.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A checkpoint write failed; the run halts rather than proceed
    /// without an audit record.
    #[error("checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A sealed run was mutated (internal invariant violation).
    #[error(transparent)]
    Run(#[from] RunSealed),

    /// Replaying a sealed run diverged from its recorded verdicts.
    #[error("replay mismatch for run {run_id}: {detail}")]
    ReplayMismatch {
        /// The run that failed to replay.
        run_id: String,
        /// What diverged.
        detail: String,
    },
}

/// Result of one admission run.
#[derive(Debug)]
pub struct AdmissionOutcome {
    /// The sealed run record.
    pub run: PipelineRun,
    /// The broker fill, when the run was admitted.
    pub fill: Option<OrderResult>,
}

impl AdmissionOutcome {
    fn rejected(run: PipelineRun) -> Self {
        Self { run, fill: None }
    }
}

/// The ordered admission pipeline.
pub struct GatePipeline {
    gates: Vec<Box<dyn Gate>>,
    killswitch: Arc<KillSwitch>,
    breaker: Arc<RwLock<DrawdownBreaker>>,
    store: Arc<CheckpointStore>,
    router: Arc<BrokerRouter>,
}

impl GatePipeline {
    /// Create a pipeline over an explicitly ordered gate registry.
    #[must_use]
    pub fn new(
        gates: Vec<Box<dyn Gate>>,
        killswitch: Arc<KillSwitch>,
        breaker: Arc<RwLock<DrawdownBreaker>>,
        store: Arc<CheckpointStore>,
        router: Arc<BrokerRouter>,
    ) -> Self {
        Self {
            gates,
            killswitch,
            breaker,
            store,
            router,
        }
    }

    /// Evaluate a candidate end to end.
    ///
    /// Always returns a sealed run on success; `Err` means the run could not
    /// be durably recorded.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Checkpoint`] on any checkpoint write failure.
    pub async fn evaluate(
        &self,
        candidate: TradeCandidate,
    ) -> Result<AdmissionOutcome, PipelineError> {
        let restrictions = self
            .breaker
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .restrictions();
        let broker_available = self.router.has_usable_backend();

        // Kill switch before any broker traffic, account fetch included.
        if self.killswitch.is_active() {
            let run = PipelineRun::new(
                candidate,
                RunContext {
                    size_multiplier: restrictions.size_multiplier,
                    buying_power: Decimal::ZERO,
                    broker_available,
                },
            );
            return self.seal_run(run, RunState::AbortedByKillSwitch, ReasonCode::KillSwitchActive);
        }

        let buying_power = match self.router.get_account().await {
            Ok(snapshot) => snapshot.buying_power,
            Err(e) => {
                tracing::warn!(error = %e, "Account unavailable, assuming zero buying power");
                Decimal::ZERO
            }
        };
        let mut run = PipelineRun::new(
            candidate,
            RunContext {
                size_multiplier: restrictions.size_multiplier,
                buying_power,
                broker_available,
            },
        );

        if restrictions.trading_halted {
            return self.seal_run(
                run,
                RunState::AbortedByCircuitBreaker,
                ReasonCode::CircuitBreakerHalted,
            );
        }
        if restrictions.entries_paused {
            return self.seal_run(run, RunState::Rejected, ReasonCode::CircuitBreakerPaused);
        }

        self.store.begin(&run)?;

        for gate in &self.gates {
            let verdict = {
                let ctx = GateContext::from_run(&run.context, &run.verdicts);
                gate.evaluate(&run.candidate, &ctx).await
            };
            let rejected = verdict.is_reject();
            let reason = verdict.reason;
            tracing::debug!(
                run_id = %run.run_id,
                gate = %verdict.gate,
                outcome = if rejected { "reject" } else { "pass" },
                reason = %reason,
                confidence = verdict.confidence,
                "Gate verdict"
            );

            run.push_verdict(verdict)?;
            self.store.record_gate(&run)?;

            if rejected {
                return self.seal_run(run, RunState::Rejected, reason);
            }
        }

        // Re-check both overrides after the gates: either may have flipped
        // while scorers were running.
        if self.killswitch.is_active() {
            return self.seal_run(run, RunState::AbortedByKillSwitch, ReasonCode::KillSwitchActive);
        }
        let restrictions = self
            .breaker
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .restrictions();
        if restrictions.trading_halted {
            return self.seal_run(
                run,
                RunState::AbortedByCircuitBreaker,
                ReasonCode::CircuitBreakerHalted,
            );
        }
        if restrictions.entries_paused {
            return self.seal_run(run, RunState::Rejected, ReasonCode::CircuitBreakerPaused);
        }

        self.submit(run).await
    }

    async fn submit(&self, mut run: PipelineRun) -> Result<AdmissionOutcome, PipelineError> {
        let notional = GateContext::from_run(&run.context, &run.verdicts)
            .sized_notional(run.candidate.notional);
        let request = OrderRequest {
            client_order_id: run.run_id.clone(),
            symbol: run.candidate.symbol.clone(),
            side: run.candidate.side,
            notional,
        };

        match self.router.submit_order(&request).await {
            Ok(fill) => {
                run.seal(RunState::Admitted, Some(ReasonCode::Passed))?;
                self.store.seal(&run)?;
                tracing::info!(
                    run_id = %run.run_id,
                    symbol = %run.candidate.symbol,
                    notional = %notional,
                    broker = %fill.broker,
                    "Candidate admitted and submitted"
                );
                Ok(AdmissionOutcome {
                    run,
                    fill: Some(fill),
                })
            }
            Err(RouterError::KillSwitchActive { .. }) => {
                self.seal_run(run, RunState::AbortedByKillSwitch, ReasonCode::KillSwitchActive)
            }
            Err(RouterError::NoBrokerAvailable) => {
                tracing::error!(
                    run_id = %run.run_id,
                    symbol = %run.candidate.symbol,
                    "Every broker backend exhausted, order dropped"
                );
                self.seal_run(run, RunState::Rejected, ReasonCode::NoBrokerAvailable)
            }
            Err(RouterError::Rejected { broker, source }) => {
                let reason = match source {
                    BrokerError::InsufficientFunds => ReasonCode::InsufficientBuyingPower,
                    _ => ReasonCode::BrokerRejected,
                };
                tracing::warn!(
                    run_id = %run.run_id,
                    symbol = %run.candidate.symbol,
                    broker = %broker,
                    reason = %reason,
                    "Order rejected by broker"
                );
                self.seal_run(run, RunState::Rejected, reason)
            }
        }
    }

    fn seal_run(
        &self,
        mut run: PipelineRun,
        state: RunState,
        reason: ReasonCode,
    ) -> Result<AdmissionOutcome, PipelineError> {
        run.seal(state, Some(reason))?;
        self.store.seal(&run)?;
        tracing::info!(
            run_id = %run.run_id,
            symbol = %run.candidate.symbol,
            terminal = %state,
            reason = %reason,
            "Run sealed"
        );
        Ok(AdmissionOutcome::rejected(run))
    }

    /// Re-execute a sealed run's gates from its stored candidate and context
    /// and verify the recorded verdicts and terminal state still hold.
    ///
    /// Runs sealed before any gate executed (kill switch, breaker
    /// pre-flight) have no verdicts to verify and replay trivially. No
    /// broker call is ever made here.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ReplayMismatch`] on any divergence.
    pub async fn replay(&self, original: &PipelineRun) -> Result<(), PipelineError> {
        let mismatch = |detail: String| PipelineError::ReplayMismatch {
            run_id: original.run_id.clone(),
            detail,
        };

        if !original.is_sealed() {
            return Err(mismatch("run is not sealed".to_string()));
        }
        if original.verdicts.is_empty() {
            return Ok(());
        }

        let mut replayed = Vec::new();
        for gate in &self.gates {
            let verdict = {
                let ctx = GateContext::from_run(&original.context, &replayed);
                gate.evaluate(&original.candidate, &ctx).await
            };
            let rejected = verdict.is_reject();
            replayed.push(verdict);
            if rejected {
                break;
            }
        }

        if replayed != original.verdicts {
            return Err(mismatch(format!(
                "recorded {} verdicts, replay produced {} with different content",
                original.verdicts.len(),
                replayed.len()
            )));
        }

        // A gate-driven rejection pins the terminal state; terminals decided
        // after the gates (submission outcome, late kill switch) are outside
        // what a pure replay can re-derive.
        if let Some(last) = replayed.last() {
            if last.is_reject()
                && (original.terminal != Some(RunState::Rejected)
                    || original.terminal_reason != Some(last.reason))
            {
                return Err(mismatch(format!(
                    "replayed rejection '{}' does not match recorded terminal",
                    last.reason
                )));
            }
        }

        Ok(())
    }
}
