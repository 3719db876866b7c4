//! Strategies: turn data events into signals.
//!
//! A [`Strategy`] is synchronous and owned by one run. In the default mode
//! the engine keeps one instance per pair and calls [`Strategy::on_signal`].
//! With simultaneous processing a single instance receives the latest event
//! of every pair at once through [`Strategy::on_simultaneous_signals`].

pub mod dca;
pub mod registry;
pub mod rsi;

pub use dca::DollarCostAverage;
pub use registry::{StrategyFactory, StrategyRegistry};
pub use rsi::RsiStrategy;

use crate::domain::{PairKey, Position};
use crate::event::{DataEvent, SignalEvent};
use crate::portfolio::Portfolio;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    #[error("invalid setting '{key}': {message}")]
    InvalidSetting { key: String, message: String },

    #[error("strategy '{0}' does not support simultaneous signal processing")]
    SimultaneousUnsupported(String),

    #[error("strategy failed: {0}")]
    Failed(String),
}

/// Read-only view of the run a strategy may consult.
#[derive(Debug, Clone, Copy)]
pub struct StrategyContext<'a> {
    portfolio: &'a Portfolio,
}

impl<'a> StrategyContext<'a> {
    pub fn new(portfolio: &'a Portfolio) -> Self {
        Self { portfolio }
    }

    pub fn position(&self, key: &PairKey) -> Option<&'a Position> {
        self.portfolio.position(key)
    }

    pub fn is_invested(&self, key: &PairKey) -> bool {
        self.portfolio.is_invested(key)
    }

    pub fn portfolio(&self) -> &'a Portfolio {
        self.portfolio
    }
}

pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn supports_simultaneous_processing(&self) -> bool;

    /// Apply `custom_settings` from the config. Unknown keys are an error.
    fn set_custom_settings(&mut self, settings: &BTreeMap<String, Value>) -> Result<(), StrategyError>;

    fn on_signal(&mut self, data: &DataEvent, ctx: &StrategyContext<'_>) -> Result<SignalEvent, StrategyError>;

    /// One signal per event, in the order given.
    fn on_simultaneous_signals(
        &mut self,
        data: &[DataEvent],
        ctx: &StrategyContext<'_>,
    ) -> Result<Vec<SignalEvent>, StrategyError> {
        let _ = (data, ctx);
        Err(StrategyError::SimultaneousUnsupported(self.name().to_string()))
    }
}

/// Read a numeric custom setting.
pub(crate) fn number_setting(key: &str, value: &Value) -> Result<f64, StrategyError> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| StrategyError::InvalidSetting { key: key.to_string(), message: format!("expected a number, got {value}") })
}
