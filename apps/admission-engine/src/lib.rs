// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Admission Engine - Rust Core Library
//!
//! Trade admission and resilience engine for the Keel trading system.
//!
//! # Architecture
//!
//! A candidate trade flows through one deterministic path:
//!
//! ```text
//! TradeCandidate
//!   → kill-switch check        (killswitch)
//!   → circuit-breaker check    (breaker)
//!   → ordered gate pipeline    (pipeline, checkpointed per verdict)
//!   → order routing + failover (broker)
//!   → position tracking        (positions)
//! ```
//!
//! - `models`: Plain data: candidates, verdicts, sealed run records,
//!   positions
//! - `pipeline`: The ordered gate registry and the admission run driver
//! - `breaker`: Tiered portfolio drawdown circuit breaker
//! - `killswitch`: Global halt from file sentinel, environment, or API
//! - `broker`: Broker trait, health tracking, retry/failover router, paper
//!   backend
//! - `checkpoint`: Write-ahead run persistence, resume, replay support,
//!   duplicate guard
//! - `positions`: Per-tier exit rules and the open-position book
//! - `engine`: Control loops wiring everything together
//! - `config`: YAML configuration with environment interpolation
//! - `telemetry`: Tracing setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod breaker;
pub mod broker;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod killswitch;
pub mod models;
pub mod pipeline;
pub mod positions;
pub mod telemetry;

pub use breaker::{
    BreakerPolicy, BreakerState, BreakerTier, DrawdownBreaker, PortfolioMetrics, Restrictions,
};
pub use broker::{
    AccountSnapshot, Broker, BrokerError, BrokerRouter, HealthMonitor, HealthRegistry,
    HealthStatus, OrderRequest, OrderResult, OrderStatus, PaperBroker, RetryPolicy, RouterError,
};
pub use checkpoint::{CheckpointError, CheckpointStore, Persisted, StateStore};
pub use config::{Config, ConfigError, load_config, validate_config};
pub use engine::AdmissionEngine;
pub use killswitch::{ActivationSource, KillSwitch, KillSwitchState, KillSwitchStatus};
pub use models::{
    CloseOrder, CloseReason, ClosedTrade, GateOutcome, GateVerdict, OrderSide, PipelineRun,
    Position, ReasonCode, RunContext, RunState, ScoreSample, StrategyTier, TradeCandidate,
};
pub use pipeline::{
    AdmissionOutcome, Gate, GateContext, GateParams, GatePipeline, PipelineError, standard_gates,
};
pub use positions::{ExitPolicy, ExitRules, PositionManager};
