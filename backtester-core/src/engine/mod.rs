//! Simulation engine: one run's event loop and lifecycle.
//!
//! The engine pulls timestamp batches from a [`DataHandler`], and for each
//! batch:
//!
//! 1. records the data and marks the portfolio to market
//! 2. liquidates under-water leveraged pools
//! 3. asks the strategy for signals
//! 4. applies transfers, sizes signals into orders and executes them
//! 5. applies fills and records holdings and equity
//!
//! Cancellation is only observed between batches.
//!
//! [`DataHandler`]: crate::data::DataHandler

pub mod event_loop;
pub mod state;

pub use event_loop::{Engine, EngineHandles, EngineOutcome};
pub use state::{RunControl, RunState, RunStatus};

use crate::config::{Config, DataSource};
use crate::data::{DataError, DataServices};
use crate::execution::ExecutionError;
use crate::portfolio::PortfolioError;
use crate::statistics::StatisticsError;
use crate::strategy::StrategyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("setup: {0}")]
    Setup(String),

    #[error("data: {0}")]
    Data(#[from] DataError),

    #[error("portfolio: {0}")]
    Portfolio(#[from] PortfolioError),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("strategy: {0}")]
    Strategy(#[from] StrategyError),

    #[error("statistics: {0}")]
    Statistics(#[from] StatisticsError),

    #[error("close positions on exit failed: {0}")]
    ClosePositions(String),
}

impl EngineError {
    /// Fatal errors end the run as Errored. The rest are recorded and the
    /// loop moves on.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Execution(e) => e.is_fatal(),
            EngineError::Strategy(StrategyError::Failed(_)) => false,
            _ => true,
        }
    }
}

/// Check that every collaborator the config needs is available.
pub fn check_services(cfg: &Config, services: &DataServices) -> Result<(), EngineError> {
    let source = cfg.data_settings.source().map_err(|e| EngineError::Setup(e.to_string()))?;
    let needs_gateway = matches!(source, DataSource::Api(_) | DataSource::Live(_));
    if needs_gateway {
        for exchange in cfg.exchanges() {
            if !services.gateways.contains(&exchange) {
                return Err(EngineError::Setup(format!("no gateway registered for exchange '{exchange}'")));
            }
        }
    }
    if matches!(source, DataSource::Database(_)) && services.candle_store.is_none() {
        return Err(EngineError::Setup("database data requires a configured candle store".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::spot_config;
    use crate::config::{DateRange, LiveData};
    use crate::gateway::{GatewayRegistry, ScriptedGateway};
    use chrono::DateTime;
    use std::sync::Arc;

    #[test]
    fn fatal_classification() {
        assert!(EngineError::Data(DataError::Timeout(5)).is_fatal());
        assert!(!EngineError::Execution(ExecutionError::NoPrice("x".into())).is_fatal());
        assert!(EngineError::Execution(ExecutionError::UnconfiguredPair("x".into())).is_fatal());
        assert!(!EngineError::Strategy(StrategyError::Failed("x".into())).is_fatal());
        assert!(EngineError::ClosePositions("x".into()).is_fatal());
    }

    #[test]
    fn live_runs_need_gateways() {
        let mut cfg = spot_config();
        cfg.data_settings.csv_data = None;
        cfg.data_settings.live_data = Some(LiveData::default());
        let mut services = DataServices::default();
        assert!(matches!(check_services(&cfg, &services), Err(EngineError::Setup(_))));
        services.gateways = GatewayRegistry::new().with(Arc::new(ScriptedGateway::new("Binance")));
        assert!(check_services(&cfg, &services).is_ok());
    }

    #[test]
    fn database_runs_need_a_store() {
        let mut cfg = spot_config();
        cfg.data_settings.csv_data = None;
        cfg.data_settings.database_data = Some(DateRange {
            start_date: DateTime::from_timestamp(0, 0).unwrap(),
            end_date: DateTime::from_timestamp(86_400, 0).unwrap(),
            inclusive_end_date: false,
        });
        assert!(check_services(&cfg, &DataServices::default()).is_err());
    }

    #[test]
    fn csv_runs_need_nothing() {
        assert!(check_services(&spot_config(), &DataServices::default()).is_ok());
    }
}
