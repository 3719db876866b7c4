//! In-process gateway driven by scripted price paths.
//!
//! Each polled ticker advances the pair's script by one step and stamps it
//! one interval after the previous step. Non-cycling scripts stop advancing
//! once exhausted, so pollers see no new data. Orders fill in full at the
//! current scripted price unless a failure switch is set.

use super::{BookLevel, ExchangeGateway, GatewayError, OrderAck, OrderBook, OrderRequest, Ticker};
use crate::domain::{Candle, PairKey, TimedCandle};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 2024-01-01T00:00:00Z
const SCRIPT_EPOCH_SECS: i64 = 1_704_067_200;
const DEFAULT_VOLUME: f64 = 1_000_000.0;

#[derive(Debug, Clone)]
struct PriceScript {
    prices: Vec<f64>,
    cycle: bool,
    ticks: u64,
    interval_secs: u64,
}

impl PriceScript {
    fn new(prices: Vec<f64>, cycle: bool) -> Self {
        Self { prices, cycle, ticks: 0, interval_secs: 60 }
    }

    fn advance(&mut self) {
        if self.cycle || (self.ticks as usize) < self.prices.len() {
            self.ticks += 1;
        }
    }

    fn price(&self) -> Option<f64> {
        if self.prices.is_empty() {
            return None;
        }
        let step = self.ticks.saturating_sub(1) as usize;
        let idx = if self.cycle { step % self.prices.len() } else { step.min(self.prices.len() - 1) };
        Some(self.prices[idx])
    }

    fn timestamp(&self) -> DateTime<Utc> {
        let epoch = DateTime::from_timestamp(SCRIPT_EPOCH_SECS, 0).unwrap_or_default();
        let step = self.ticks.saturating_sub(1) as i64;
        epoch + Duration::seconds(step * self.interval_secs as i64)
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    scripts: HashMap<PairKey, PriceScript>,
    candles: HashMap<PairKey, Vec<TimedCandle>>,
    submitted: Vec<OrderRequest>,
    cancelled: Vec<String>,
    market_data_down: bool,
    ticker_failures: u32,
    orders_down: bool,
    zero_fills: bool,
    fee_rate: f64,
    next_order_id: u64,
}

impl ScriptState {
    fn check_market_data(&mut self, what: &str) -> Result<(), GatewayError> {
        if self.market_data_down {
            return Err(GatewayError::Network(format!("{what}: market data unavailable")));
        }
        if self.ticker_failures > 0 {
            self.ticker_failures -= 1;
            return Err(GatewayError::Network(format!("{what}: transient failure")));
        }
        Ok(())
    }

    fn script_mut(&mut self, key: &PairKey) -> Result<&mut PriceScript, GatewayError> {
        self.scripts
            .get_mut(key)
            .ok_or_else(|| GatewayError::NotFound(format!("no price script for {key}")))
    }
}

#[derive(Debug)]
pub struct ScriptedGateway {
    name: String,
    state: Mutex<ScriptState>,
}

impl ScriptedGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), state: Mutex::new(ScriptState::default()) }
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Walk `prices` once, then hold the last price without advancing time.
    pub fn with_prices(self, key: PairKey, prices: Vec<f64>) -> Self {
        self.state().scripts.insert(key, PriceScript::new(prices, false));
        self
    }

    /// Walk `prices` forever.
    pub fn with_cycling_prices(self, key: PairKey, prices: Vec<f64>) -> Self {
        self.state().scripts.insert(key, PriceScript::new(prices, true));
        self
    }

    /// Fixed candle history served by `get_historic_candles`.
    pub fn with_candles(self, key: PairKey, candles: Vec<TimedCandle>) -> Self {
        self.state().candles.insert(key, candles);
        self
    }

    pub fn with_fee_rate(self, rate: f64) -> Self {
        self.state().fee_rate = rate;
        self
    }

    /// Fail every market data call while set.
    pub fn set_market_data_down(&self, down: bool) {
        self.state().market_data_down = down;
    }

    /// Fail the next `n` market data calls.
    pub fn fail_next_market_data(&self, n: u32) {
        self.state().ticker_failures = n;
    }

    /// Reject every order submission while set.
    pub fn set_orders_down(&self, down: bool) {
        self.state().orders_down = down;
    }

    /// Acknowledge orders with a zero filled amount while set.
    pub fn set_zero_fills(&self, zero: bool) {
        self.state().zero_fills = zero;
    }

    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.state().submitted.clone()
    }

    pub fn cancelled_orders(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    /// Current scripted price without advancing.
    pub fn current_price(&self, key: &PairKey) -> Option<f64> {
        self.state().scripts.get(key).and_then(PriceScript::price)
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_ticker(&self, key: &PairKey) -> Result<Ticker, GatewayError> {
        let mut state = self.state();
        state.check_market_data("fetch_ticker")?;
        let script = state.script_mut(key)?;
        script.advance();
        let last = script
            .price()
            .ok_or_else(|| GatewayError::NotFound(format!("empty price script for {key}")))?;
        Ok(Ticker {
            timestamp: script.timestamp(),
            last,
            bid: last,
            ask: last,
            volume: DEFAULT_VOLUME,
        })
    }

    async fn fetch_orderbook(&self, key: &PairKey) -> Result<OrderBook, GatewayError> {
        let mut state = self.state();
        state.check_market_data("fetch_orderbook")?;
        let price = state
            .script_mut(key)?
            .price()
            .ok_or_else(|| GatewayError::NotFound(format!("empty price script for {key}")))?;
        Ok(OrderBook {
            bids: vec![BookLevel { price, amount: DEFAULT_VOLUME }],
            asks: vec![BookLevel { price, amount: DEFAULT_VOLUME }],
        })
    }

    /// Serves the fixed history when one was given. Otherwise advances the
    /// price script by one step and returns it as a flat candle, which is
    /// what a live candle poller sees.
    async fn get_historic_candles(
        &self,
        key: &PairKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_secs: u64,
    ) -> Result<Vec<TimedCandle>, GatewayError> {
        let mut state = self.state();
        state.check_market_data("get_historic_candles")?;
        if let Some(candles) = state.candles.get(key) {
            return Ok(candles
                .iter()
                .filter(|c| c.timestamp >= start && c.timestamp < end)
                .copied()
                .collect());
        }
        let script = state.script_mut(key)?;
        script.interval_secs = interval_secs.max(1);
        script.advance();
        Ok(script
            .price()
            .map(|price| TimedCandle {
                timestamp: script.timestamp(),
                candle: Candle { open: price, high: price, low: price, close: price, volume: DEFAULT_VOLUME },
            })
            .into_iter()
            .collect())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let mut state = self.state();
        if state.orders_down {
            return Err(GatewayError::Rejected(format!("{}: order entry unavailable", self.name)));
        }
        let (price, timestamp) = match state.scripts.get(&request.key) {
            Some(script) => (script.price().unwrap_or(request.price), script.timestamp()),
            None => (request.price, Utc::now()),
        };
        let amount = if state.zero_fills { 0.0 } else { request.amount };
        state.next_order_id += 1;
        let order_id = format!("{}-{}", self.name.to_lowercase(), state.next_order_id);
        let fee = price * amount * state.fee_rate;
        state.submitted.push(request.clone());
        Ok(OrderAck { order_id, price, amount, fee, timestamp })
    }

    async fn cancel_order(&self, _key: &PairKey, order_id: &str) -> Result<(), GatewayError> {
        self.state().cancelled.push(order_id.to_string());
        Ok(())
    }
}
