//! Backtester Core: events, funding, portfolio, execution, statistics and
//! the simulation loop.
//!
//! This crate contains the heart of the backtester:
//! - Domain types (pairs, candles, positions, run ids)
//! - The event chain: data → signal → order → fill
//! - Funding ledger with pooled and per-pair modes
//! - Portfolio sizing and risk rules
//! - Simulated and live execution
//! - Per-pair statistics and performance metrics
//! - Historical (API, database, CSV) and live data handlers
//! - The engine event loop and run lifecycle

pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod event;
pub mod execution;
pub mod fingerprint;
pub mod funding;
pub mod gateway;
pub mod portfolio;
pub mod rng;
pub mod statistics;
pub mod strategy;

pub use config::{Config, ConfigError};
pub use engine::{Engine, EngineError, EngineHandles, EngineOutcome, RunControl, RunState, RunStatus};
pub use statistics::{StatisticsRecorder, StatisticsSnapshot};
pub use strategy::{Strategy, StrategyRegistry};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared between the run manager and engine
    /// tasks are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::PairKey>();
        require_sync::<domain::PairKey>();
        require_send::<domain::Position>();
        require_sync::<domain::Position>();
        require_send::<domain::RunId>();
        require_sync::<domain::RunId>();
        require_send::<domain::ConfigFingerprint>();
        require_sync::<domain::ConfigFingerprint>();

        // Events
        require_send::<event::DataEvent>();
        require_sync::<event::DataEvent>();
        require_send::<event::SignalEvent>();
        require_sync::<event::SignalEvent>();
        require_send::<event::OrderEvent>();
        require_sync::<event::OrderEvent>();
        require_send::<event::FillEvent>();
        require_sync::<event::FillEvent>();

        // Config
        require_send::<Config>();
        require_sync::<Config>();

        // Shared run state
        require_send::<portfolio::Portfolio>();
        require_sync::<portfolio::Portfolio>();
        require_send::<funding::FundingLedger>();
        require_sync::<funding::FundingLedger>();
        require_send::<StatisticsRecorder>();
        require_sync::<StatisticsRecorder>();
        require_send::<StatisticsSnapshot>();
        require_sync::<StatisticsSnapshot>();
        require_send::<RunControl>();
        require_sync::<RunControl>();
        require_send::<EngineHandles>();
        require_sync::<EngineHandles>();

        // Collaborators
        require_send::<data::DataServices>();
        require_sync::<data::DataServices>();
        require_send::<gateway::GatewayRegistry>();
        require_sync::<gateway::GatewayRegistry>();
        require_send::<StrategyRegistry>();
        require_sync::<StrategyRegistry>();
        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();

        // The engine moves into its own task.
        require_send::<Engine>();
        require_send::<Box<dyn Strategy>>();
        require_send::<Box<dyn data::DataHandler>>();
    }

    /// Strategies see the portfolio only through a shared reference.
    #[test]
    fn strategy_context_is_read_only() {
        fn _check_trait_object_builds(
            strategy: &mut dyn Strategy,
            data: &event::DataEvent,
            ctx: &strategy::StrategyContext<'_>,
        ) -> Result<event::SignalEvent, strategy::StrategyError> {
            strategy.on_signal(data, ctx)
        }
    }
}
