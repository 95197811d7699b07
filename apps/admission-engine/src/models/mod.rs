//! Core data model for the admission engine.
//!
//! Everything here is plain data: candidates entering the pipeline, the
//! verdicts gates hand back, the sealed run record, and open/closed
//! positions. Mutation rules (append-only runs, single-writer positions)
//! are enforced by the owning components, not by these types.

mod candidate;
mod position;
mod run;
mod verdict;

pub use candidate::{OrderSide, ScoreSample, StrategyTier, TradeCandidate};
pub use position::{CloseOrder, CloseReason, ClosedTrade, Position};
pub use run::{PipelineRun, RunContext, RunSealed, RunState};
pub use verdict::{GateOutcome, GateVerdict, ReasonCode};
