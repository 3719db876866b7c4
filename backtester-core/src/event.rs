//! Event types flowing through the pipeline: Data → Signal → Order → Fill.
//!
//! All events are immutable values. Every downstream event carries an
//! [`EventRef`] back to the data observation it originated from, so the
//! statistics recorder can file it under the right offset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Candle, PairKey};

/// What a signal, order or fill intends to do (or why it did nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
    DoNothing,
    CouldNotBuy,
    CouldNotSell,
    ClosePosition,
    MissingData,
    TransferredFunds,
}

impl Direction {
    /// Buy and Sell are the only directions that move a position.
    pub fn is_trade(self) -> bool {
        matches!(self, Direction::Buy | Direction::Sell)
    }

    /// +1 for buys, -1 for sells, 0 otherwise.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
            _ => 0.0,
        }
    }

    /// The direction recorded when a trade of this direction is refused.
    pub fn rejected(self) -> Direction {
        match self {
            Direction::Buy => Direction::CouldNotBuy,
            Direction::Sell => Direction::CouldNotSell,
            other => other,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

/// Back-reference to the data observation an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
}

/// The market observation carried by a [`DataEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Observation {
    Candle(Candle),
    Tick { price: f64, volume: f64 },
}

/// One market observation for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEvent {
    /// 1-based sequence number within the pair's stream.
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
    pub key: PairKey,
    pub interval_secs: u64,
    pub observation: Observation,
}

impl DataEvent {
    pub fn event_ref(&self) -> EventRef {
        EventRef { offset: self.offset, timestamp: self.timestamp }
    }

    pub fn close_price(&self) -> f64 {
        match self.observation {
            Observation::Candle(c) => c.close,
            Observation::Tick { price, .. } => price,
        }
    }

    pub fn candle(&self) -> Option<&Candle> {
        match &self.observation {
            Observation::Candle(c) => Some(c),
            Observation::Tick { .. } => None,
        }
    }
}

/// Request to move pooled funds between exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundTransfer {
    pub from_exchange: String,
    pub to_exchange: String,
    pub currency: String,
    pub amount: f64,
}

/// A strategy's reading of a data event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub source: EventRef,
    pub key: PairKey,
    pub direction: Direction,
    /// Price to size against; the close price when absent.
    pub price: Option<f64>,
    /// Exact amount wanted; sized from available funds when absent.
    pub amount: Option<f64>,
    pub leverage: Option<f64>,
    pub transfer: Option<FundTransfer>,
    pub reason: String,
}

impl SignalEvent {
    pub fn new(data: &DataEvent, direction: Direction) -> Self {
        Self {
            source: data.event_ref(),
            key: data.key.clone(),
            direction,
            price: None,
            amount: None,
            leverage: None,
            transfer: None,
            reason: String::new(),
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn with_transfer(mut self, transfer: FundTransfer) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// The portfolio's sizing decision for a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub source: EventRef,
    pub key: PairKey,
    pub direction: Direction,
    pub kind: OrderKind,
    pub price: f64,
    pub amount: f64,
    pub leverage: f64,
    /// Funds reserved for this order: quote for buys, base for spot sells,
    /// margin for futures.
    pub allocated_funds: f64,
    pub closing_position: bool,
    pub liquidation: bool,
    pub reason: String,
}

/// A realised execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub source: EventRef,
    pub key: PairKey,
    pub direction: Direction,
    pub price: f64,
    pub amount: f64,
    pub fee: f64,
    /// `price*amount + fee` for buys, `price*amount - fee` for sells.
    pub net_value: f64,
    pub slippage_percent: f64,
    pub leverage: f64,
    pub allocated_funds: f64,
    pub closing_position: bool,
    pub liquidation: bool,
    pub exchange_order_id: Option<String>,
    pub reason: String,
}

impl FillEvent {
    /// Build a fill for `order` executed at `price` for `amount`.
    pub fn from_order(order: &OrderEvent, price: f64, amount: f64, fee: f64) -> Self {
        Self {
            source: order.source,
            key: order.key.clone(),
            direction: order.direction,
            price,
            amount,
            fee,
            net_value: net_value(order.direction, price, amount, fee),
            slippage_percent: 0.0,
            leverage: order.leverage,
            allocated_funds: order.allocated_funds,
            closing_position: order.closing_position,
            liquidation: order.liquidation,
            exchange_order_id: None,
            reason: order.reason.clone(),
        }
    }

    /// Position delta: +amount for buys, -amount for sells.
    pub fn signed_amount(&self) -> f64 {
        self.direction.sign() * self.amount
    }

    /// Quote-funds delta: buys spend `net_value`, sells receive it.
    pub fn funds_delta(&self) -> f64 {
        -self.direction.sign() * self.net_value
    }
}

/// `price*amount ± fee`, sign by direction.
pub fn net_value(direction: Direction, price: f64, amount: f64, fee: f64) -> f64 {
    match direction {
        Direction::Buy => price * amount + fee,
        Direction::Sell => price * amount - fee,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetClass, CurrencyPair};

    fn data_event() -> DataEvent {
        DataEvent {
            offset: 1,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            key: PairKey::new("binance", AssetClass::Spot, CurrencyPair::new("BTC", "USDT")),
            interval_secs: 60,
            observation: Observation::Candle(Candle {
                open: 100.0,
                high: 110.0,
                low: 95.0,
                close: 105.0,
                volume: 10.0,
            }),
        }
    }

    fn order(direction: Direction) -> OrderEvent {
        let data = data_event();
        OrderEvent {
            source: data.event_ref(),
            key: data.key,
            direction,
            kind: OrderKind::Market,
            price: 100.0,
            amount: 2.0,
            leverage: 1.0,
            allocated_funds: 250.0,
            closing_position: false,
            liquidation: false,
            reason: String::new(),
        }
    }

    #[test]
    fn rejected_direction_maps_trades_only() {
        assert_eq!(Direction::Buy.rejected(), Direction::CouldNotBuy);
        assert_eq!(Direction::Sell.rejected(), Direction::CouldNotSell);
        assert_eq!(Direction::DoNothing.rejected(), Direction::DoNothing);
    }

    #[test]
    fn buy_fill_spends_price_plus_fee() {
        let fill = FillEvent::from_order(&order(Direction::Buy), 100.0, 2.0, 1.5);
        assert!((fill.net_value - 201.5).abs() < 1e-10);
        assert!((fill.funds_delta() + 201.5).abs() < 1e-10);
        assert!((fill.signed_amount() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn sell_fill_receives_price_minus_fee() {
        let fill = FillEvent::from_order(&order(Direction::Sell), 100.0, 2.0, 1.5);
        assert!((fill.net_value - 198.5).abs() < 1e-10);
        assert!((fill.funds_delta() - 198.5).abs() < 1e-10);
        assert!((fill.signed_amount() + 2.0).abs() < 1e-10);
    }

    #[test]
    fn signal_keeps_reference_to_its_data() {
        let data = data_event();
        let signal = SignalEvent::new(&data, Direction::Buy).with_amount(0.5).with_reason("test");
        assert_eq!(signal.source, data.event_ref());
        assert_eq!(signal.amount, Some(0.5));
        assert_eq!(data.close_price(), 105.0);
    }
}
