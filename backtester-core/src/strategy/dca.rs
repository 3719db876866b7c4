//! Dollar cost averaging: buy on every observation.

use super::{Strategy, StrategyContext, StrategyError};
use crate::event::{DataEvent, Direction, SignalEvent};
use serde_json::Value;
use std::collections::BTreeMap;

pub const NAME: &str = "dollarcostaverage";

#[derive(Debug, Clone, Default)]
pub struct DollarCostAverage;

impl DollarCostAverage {
    fn signal(data: &DataEvent) -> SignalEvent {
        if data.close_price() > 0.0 {
            SignalEvent::new(data, Direction::Buy).with_reason("dollar cost average purchase")
        } else {
            SignalEvent::new(data, Direction::MissingData).with_reason("no usable close price")
        }
    }
}

impl Strategy for DollarCostAverage {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Buys on every data event, sized by the portfolio's limits."
    }

    fn supports_simultaneous_processing(&self) -> bool {
        true
    }

    fn set_custom_settings(&mut self, settings: &BTreeMap<String, Value>) -> Result<(), StrategyError> {
        match settings.keys().next() {
            Some(key) => Err(StrategyError::InvalidSetting {
                key: key.clone(),
                message: format!("{NAME} takes no custom settings"),
            }),
            None => Ok(()),
        }
    }

    fn on_signal(&mut self, data: &DataEvent, _ctx: &StrategyContext<'_>) -> Result<SignalEvent, StrategyError> {
        Ok(Self::signal(data))
    }

    fn on_simultaneous_signals(
        &mut self,
        data: &[DataEvent],
        _ctx: &StrategyContext<'_>,
    ) -> Result<Vec<SignalEvent>, StrategyError> {
        Ok(data.iter().map(Self::signal).collect())
    }
}
