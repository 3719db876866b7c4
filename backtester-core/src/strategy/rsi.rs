//! Relative Strength Index strategy.
//!
//! Buys when RSI falls below `rsi-low`, sells above `rsi-high`.
//! RSI uses Wilder smoothing of average gains and average losses:
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss), seeded with the simple
//! average of the first `rsi-period` changes.

use super::{number_setting, Strategy, StrategyContext, StrategyError};
use crate::domain::PairKey;
use crate::event::{DataEvent, Direction, SignalEvent};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const NAME: &str = "rsi";

const PERIOD_KEY: &str = "rsi-period";
const HIGH_KEY: &str = "rsi-high";
const LOW_KEY: &str = "rsi-low";

/// Running Wilder RSI for one price stream.
#[derive(Debug, Clone, Default)]
struct RsiState {
    prev_close: Option<f64>,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl RsiState {
    /// Feed one close. Returns the RSI once `period` changes have been seen.
    fn push(&mut self, close: f64, period: usize) -> Option<f64> {
        if close.is_nan() {
            *self = Self::default();
            return None;
        }
        let prev = self.prev_close.replace(close)?;
        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.changes += 1;

        if self.changes <= period {
            self.avg_gain += gain;
            self.avg_loss += loss;
            if self.changes < period {
                return None;
            }
            self.avg_gain /= period as f64;
            self.avg_loss /= period as f64;
        } else {
            let alpha = 1.0 / period as f64;
            self.avg_gain = alpha * gain + (1.0 - alpha) * self.avg_gain;
            self.avg_loss = alpha * loss + (1.0 - alpha) * self.avg_loss;
        }
        Some(compute_rsi(self.avg_gain, self.avg_loss))
    }
}

fn compute_rsi(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0 // no movement
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[derive(Debug, Clone)]
pub struct RsiStrategy {
    period: usize,
    high: f64,
    low: f64,
    states: HashMap<PairKey, RsiState>,
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self { period: 14, high: 70.0, low: 30.0, states: HashMap::new() }
    }
}

impl RsiStrategy {
    pub fn period(&self) -> usize {
        self.period
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    fn signal(&mut self, data: &DataEvent) -> SignalEvent {
        let state = self.states.entry(data.key.clone()).or_default();
        let Some(rsi) = state.push(data.close_price(), self.period) else {
            return SignalEvent::new(data, Direction::MissingData)
                .with_reason(format!("not enough data for a {}-period RSI", self.period));
        };
        let direction = if rsi < self.low {
            Direction::Buy
        } else if rsi > self.high {
            Direction::Sell
        } else {
            Direction::DoNothing
        };
        SignalEvent::new(data, direction).with_reason(format!("RSI at {rsi:.2}"))
    }
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Buys oversold and sells overbought conditions measured by the Relative Strength Index."
    }

    fn supports_simultaneous_processing(&self) -> bool {
        true
    }

    fn set_custom_settings(&mut self, settings: &BTreeMap<String, Value>) -> Result<(), StrategyError> {
        let mut next = Self::default();
        for (key, value) in settings {
            let n = number_setting(key, value)?;
            match key.as_str() {
                PERIOD_KEY => {
                    if n < 1.0 || n.fract() != 0.0 {
                        return Err(StrategyError::InvalidSetting {
                            key: key.clone(),
                            message: format!("period must be a positive integer, got {n}"),
                        });
                    }
                    next.period = n as usize;
                }
                HIGH_KEY => next.high = n,
                LOW_KEY => next.low = n,
                _ => {
                    return Err(StrategyError::InvalidSetting {
                        key: key.clone(),
                        message: format!("{NAME} does not use this setting"),
                    })
                }
            }
        }
        if !(0.0 < next.low && next.low < next.high && next.high < 100.0) {
            return Err(StrategyError::InvalidSetting {
                key: format!("{LOW_KEY}/{HIGH_KEY}"),
                message: format!("need 0 < low < high < 100, got {} and {}", next.low, next.high),
            });
        }
        *self = next;
        Ok(())
    }

    fn on_signal(&mut self, data: &DataEvent, _ctx: &StrategyContext<'_>) -> Result<SignalEvent, StrategyError> {
        Ok(self.signal(data))
    }

    fn on_simultaneous_signals(
        &mut self,
        data: &[DataEvent],
        _ctx: &StrategyContext<'_>,
    ) -> Result<Vec<SignalEvent>, StrategyError> {
        Ok(data.iter().map(|d| self.signal(d)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::spot_config;
    use crate::portfolio::tests::candle_event;
    use crate::portfolio::Portfolio;

    fn series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
        let mut state = RsiState::default();
        closes.iter().map(|&c| state.push(c, period)).collect()
    }

    fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
        assert!((actual - expected).abs() < epsilon, "actual={actual}, expected={expected}");
    }

    #[test]
    fn rsi_all_gains() {
        let out = series(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0], 3);
        assert_eq!(&out[..3], &[None, None, None]);
        assert_approx(out[3].unwrap(), 100.0, 1e-6);
    }

    #[test]
    fn rsi_all_losses() {
        let out = series(&[105.0, 104.0, 103.0, 102.0, 101.0, 100.0], 3);
        assert_approx(out[3].unwrap(), 0.0, 1e-6);
    }

    #[test]
    fn rsi_mixed() {
        // Changes: +0.34, -0.25, -0.48 → RSI = 100 - 100/(1 + 0.34/0.73)
        let out = series(&[44.0, 44.34, 44.09, 43.61, 44.33], 3);
        assert_approx(out[3].unwrap(), 100.0 - 100.0 / (1.0 + 0.34 / 0.73), 1e-9);
        // Wilder step with +0.72
        let gain = (0.34 / 3.0) * (2.0 / 3.0) + 0.72 / 3.0;
        let loss = (0.73 / 3.0) * (2.0 / 3.0);
        assert_approx(out[4].unwrap(), 100.0 - 100.0 / (1.0 + gain / loss), 1e-9);
    }

    #[test]
    fn rsi_bounds() {
        let out = series(&[100.0, 105.0, 98.0, 110.0, 95.0, 115.0, 90.0, 120.0], 3);
        for v in out.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v), "RSI out of bounds: {v}");
        }
    }

    #[test]
    fn nan_restarts_warmup() {
        let out = series(&[100.0, 101.0, f64::NAN, 102.0, 103.0], 1);
        assert!(out[1].is_some());
        assert_eq!(&out[2..4], &[None, None]);
        assert!(out[4].is_some());
    }

    #[test]
    fn settings_are_validated() {
        let mut s = RsiStrategy::default();
        let mut settings = BTreeMap::new();
        settings.insert(PERIOD_KEY.to_string(), Value::from(5));
        settings.insert(LOW_KEY.to_string(), Value::from("20"));
        settings.insert(HIGH_KEY.to_string(), Value::from(80.0));
        s.set_custom_settings(&settings).unwrap();
        assert_eq!(s.period(), 5);
        assert_eq!(s.thresholds(), (20.0, 80.0));

        settings.insert(LOW_KEY.to_string(), Value::from(90));
        assert!(s.set_custom_settings(&settings).is_err());
        assert_eq!(s.thresholds(), (20.0, 80.0));

        let mut unknown = BTreeMap::new();
        unknown.insert("fast".to_string(), Value::from(1));
        assert!(matches!(s.set_custom_settings(&unknown), Err(StrategyError::InvalidSetting { .. })));
    }

    #[test]
    fn signals_follow_thresholds() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let portfolio = Portfolio::new(&cfg).unwrap();
        let ctx = StrategyContext::new(&portfolio);
        let mut s = RsiStrategy::default();
        let mut settings = BTreeMap::new();
        settings.insert(PERIOD_KEY.to_string(), Value::from(2));
        s.set_custom_settings(&settings).unwrap();

        let closes = [100.0, 90.0, 80.0, 90.0, 100.0, 110.0];
        let directions: Vec<Direction> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| s.on_signal(&candle_event(&key, i as u64 + 1, c), &ctx).unwrap().direction)
            .collect();
        assert_eq!(directions[0], Direction::MissingData);
        assert_eq!(directions[1], Direction::MissingData);
        assert_eq!(directions[2], Direction::Buy);
        assert_eq!(directions[5], Direction::Sell);
    }
}
