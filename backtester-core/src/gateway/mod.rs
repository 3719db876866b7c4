//! Exchange connectivity.
//!
//! The engine talks to exchanges only through [`ExchangeGateway`]. Gateways
//! are registered by name in a [`GatewayRegistry`] and looked up by the
//! lowercase exchange name of each configured pair.

pub mod scripted;

pub use scripted::ScriptedGateway;

use crate::domain::{PairKey, TimedCandle};
use crate::event::{Direction, OrderKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Last traded price and top of book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub timestamp: DateTime<Utc>,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Midpoint of the best bid and ask, if both sides are present.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.bids.first(), self.asks.first()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub key: PairKey,
    pub direction: Direction,
    pub kind: OrderKind,
    pub price: f64,
    pub amount: f64,
    pub leverage: f64,
    pub reduce_only: bool,
}

/// Exchange acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub price: f64,
    pub amount: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_ticker(&self, key: &PairKey) -> Result<Ticker, GatewayError>;

    async fn fetch_orderbook(&self, key: &PairKey) -> Result<OrderBook, GatewayError>;

    /// Candles with `start <= timestamp < end`, oldest first.
    async fn get_historic_candles(
        &self,
        key: &PairKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_secs: u64,
    ) -> Result<Vec<TimedCandle>, GatewayError>;

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError>;

    async fn cancel_order(&self, key: &PairKey, order_id: &str) -> Result<(), GatewayError>;
}

/// Gateways by lowercase exchange name.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn ExchangeGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the gateway's own name, replacing any previous entry.
    pub fn register(&mut self, gateway: Arc<dyn ExchangeGateway>) {
        self.gateways.insert(gateway.name().to_lowercase(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn ExchangeGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, exchange: &str) -> Option<Arc<dyn ExchangeGateway>> {
        self.gateways.get(&exchange.to_lowercase()).cloned()
    }

    pub fn contains(&self, exchange: &str) -> bool {
        self.gateways.contains_key(&exchange.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.gateways.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry").field("gateways", &self.names()).finish()
    }
}
