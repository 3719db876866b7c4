//! Portfolio: the funding ledger plus one position per configured pair.
//!
//! Signals are sized into orders in [`sizing`], risk and leverage rules live
//! in [`risk`]. This module applies fills and answers queries. The
//! accounting identity for every quote pool is
//! `equity == available + reserved + Σ futures market value`.

pub mod risk;
pub mod sizing;

pub use sizing::{NoTrade, Sizing};

use crate::config::{Config, LeverageSettings, SideLimits};
use crate::domain::{AssetClass, PairKey, Position, AMOUNT_EPSILON};
use crate::event::{DataEvent, Direction, EventRef, FillEvent, FundTransfer, OrderEvent, OrderKind};
use crate::execution::FeeSchedule;
use crate::funding::{FundingError, FundingKey, FundingLedger, PairFunds, FUNDS_EPSILON};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum PortfolioError {
    #[error("pair {0} is not configured")]
    UnconfiguredPair(String),

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error(transparent)]
    Funding(#[from] FundingError),
}

/// Effective trading rules for one pair after applying portfolio defaults.
#[derive(Debug, Clone)]
pub struct PairRules {
    pub asset: AssetClass,
    pub buy: SideLimits,
    pub sell: SideLimits,
    pub leverage: LeverageSettings,
    pub maximum_holdings_ratio: f64,
    pub fees: FeeSchedule,
    pub max_slippage_percent: f64,
    pub skip_volume_fitting: bool,
}

#[derive(Debug, Clone)]
struct PairState {
    key: PairKey,
    rules: PairRules,
    funds: PairFunds,
    position: Position,
    last_price: f64,
    /// The pair's latest data event; orders the portfolio generates itself
    /// are filed under it.
    last_event: Option<EventRef>,
    /// Cumulative filled notional per side, for `maximum_total`.
    bought_notional: f64,
    sold_notional: f64,
    margin: f64,
    borrowed: f64,
}

impl PairState {
    fn is_spot(&self) -> bool {
        self.rules.asset == AssetClass::Spot
    }
}

/// Per-pair holdings at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub key: PairKey,
    pub offset: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub price: f64,
    pub position: Position,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub base_funds: Option<f64>,
    pub quote_available: f64,
    pub quote_reserved: f64,
    /// Spot: base valued at `price` plus quote. Futures: pool equity.
    pub total_value: f64,
}

#[derive(Debug, Clone)]
pub struct Portfolio {
    funding: FundingLedger,
    pairs: Vec<PairState>,
    index: HashMap<PairKey, usize>,
    orders_placed: u64,
    leveraged_orders: u64,
}

impl Portfolio {
    pub fn new(cfg: &Config) -> Result<Self, PortfolioError> {
        let funding = FundingLedger::from_config(cfg)?;
        let defaults = &cfg.portfolio_settings;
        let mut pairs = Vec::with_capacity(cfg.currency_settings.len());
        let mut index = HashMap::new();

        for cs in &cfg.currency_settings {
            let key = cs.key();
            let funds = funding
                .pair_funds(&key)
                .ok_or_else(|| PortfolioError::UnconfiguredPair(key.to_string()))?;
            let leverage = match (&cs.futures_details, cs.asset) {
                (Some(details), AssetClass::Futures) => merge_leverage(&details.leverage, &defaults.leverage),
                (None, AssetClass::Futures) => defaults.leverage,
                (_, AssetClass::Spot) => LeverageSettings::default(),
            };
            let rules = PairRules {
                asset: cs.asset,
                buy: cs.buy_side.or(&defaults.buy_side),
                sell: cs.sell_side.or(&defaults.sell_side),
                leverage,
                maximum_holdings_ratio: cs.maximum_holdings_ratio,
                fees: FeeSchedule::for_pair(cs),
                max_slippage_percent: cs.max_slippage_percent,
                skip_volume_fitting: cs.skip_candle_volume_fitting,
            };
            index.insert(key.clone(), pairs.len());
            pairs.push(PairState {
                key,
                rules,
                funds,
                position: Position::default(),
                last_price: 0.0,
                last_event: None,
                bought_notional: 0.0,
                sold_notional: 0.0,
                margin: 0.0,
                borrowed: 0.0,
            });
        }

        Ok(Self { funding, pairs, index, orders_placed: 0, leveraged_orders: 0 })
    }

    fn pair_index(&self, key: &PairKey) -> Result<usize, PortfolioError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| PortfolioError::UnconfiguredPair(key.to_string()))
    }

    pub fn funding(&self) -> &FundingLedger {
        &self.funding
    }

    pub fn set_initial_funds(&mut self, key: &FundingKey, amount: f64) -> Result<(), PortfolioError> {
        Ok(self.funding.set_initial_funds(key, amount)?)
    }

    pub fn funds(&self, key: &FundingKey) -> Result<f64, PortfolioError> {
        Ok(self.funding.funds(key)?)
    }

    pub fn initial_funds(&self, key: &FundingKey) -> Result<f64, PortfolioError> {
        Ok(self.funding.initial_funds(key)?)
    }

    /// Pair keys in declaration order.
    pub fn pair_keys(&self) -> impl Iterator<Item = &PairKey> {
        self.pairs.iter().map(|p| &p.key)
    }

    pub fn rules(&self, key: &PairKey) -> Option<&PairRules> {
        self.index.get(key).map(|&i| &self.pairs[i].rules)
    }

    pub fn position(&self, key: &PairKey) -> Option<&Position> {
        self.index.get(key).map(|&i| &self.pairs[i].position)
    }

    pub fn is_invested(&self, key: &PairKey) -> bool {
        self.position(key).is_some_and(Position::is_invested)
    }

    pub fn is_long(&self, key: &PairKey) -> bool {
        self.position(key).is_some_and(Position::is_long)
    }

    pub fn is_short(&self, key: &PairKey) -> bool {
        self.position(key).is_some_and(Position::is_short)
    }

    pub fn last_price(&self, key: &PairKey) -> Option<f64> {
        self.index.get(key).map(|&i| self.pairs[i].last_price)
    }

    /// Mark the pair to the event's close price.
    pub fn update_market(&mut self, data: &DataEvent) -> Result<(), PortfolioError> {
        let idx = self.pair_index(&data.key)?;
        let price = data.close_price();
        if price > 0.0 && price.is_finite() {
            self.pairs[idx].last_price = price;
        }
        self.pairs[idx].last_event = Some(data.event_ref());
        Ok(())
    }

    /// Return funds reserved for an order that did not execute.
    pub fn release(&mut self, order: &OrderEvent) -> Result<(), PortfolioError> {
        let idx = self.pair_index(&order.key)?;
        let pair = &self.pairs[idx];
        let pool = match (pair.is_spot(), order.direction, pair.funds.base) {
            (true, Direction::Sell, Some(base)) => base,
            _ => pair.funds.quote,
        };
        self.funding.at_mut(pool).release(order.allocated_funds);
        Ok(())
    }

    /// Apply an executed fill.
    ///
    /// Buys spend `net_value`, sells receive it. Spot fills also move the
    /// base balance. Futures fills track margin and borrowed amounts, which
    /// shrink in proportion to the closed share of the position.
    ///
    /// A spot pool may never go negative. A futures fill that opens exposure
    /// may not leave the pool with negative free collateral.
    pub fn on_fill(&mut self, fill: &FillEvent) -> Result<(), PortfolioError> {
        let idx = self
            .index
            .get(&fill.key)
            .copied()
            .ok_or_else(|| PortfolioError::InternalInconsistency(format!("fill for unconfigured pair {}", fill.key)))?;

        match fill.direction {
            Direction::TransferredFunds => return Ok(()),
            Direction::Buy | Direction::Sell => {}
            other => {
                return Err(PortfolioError::InternalInconsistency(format!(
                    "fill with non-trade direction {other:?} for {}",
                    fill.key
                )))
            }
        }

        let funds = self.pairs[idx].funds;
        let spot = self.pairs[idx].is_spot();
        let quote = funds.quote;

        match (spot, fill.direction, funds.base) {
            (true, Direction::Buy, Some(base)) => {
                self.funding.at_mut(quote).release(fill.allocated_funds);
                self.funding.at_mut(quote).adjust(-fill.net_value);
                self.funding.at_mut(base).adjust(fill.amount);
            }
            (true, Direction::Sell, Some(base)) => {
                self.funding.at_mut(base).release(fill.allocated_funds);
                self.funding.at_mut(base).adjust(-fill.amount);
                self.funding.at_mut(quote).adjust(fill.net_value);
            }
            _ => {
                self.funding.at_mut(quote).release(fill.allocated_funds);
                self.funding.at_mut(quote).adjust(fill.funds_delta());
            }
        }

        let pair = &mut self.pairs[idx];
        let previous = pair.position.amount.abs();
        let change = pair.position.apply(fill.signed_amount(), fill.price);
        pair.last_price = fill.price;
        let mut opened_exposure = false;

        if !spot {
            let closed = change.closed_fraction * previous;
            let opened = (fill.amount - closed).max(0.0);
            opened_exposure = opened > AMOUNT_EPSILON;
            let released_margin = pair.margin * change.closed_fraction;
            let released_borrow = pair.borrowed * change.closed_fraction;
            let leverage = fill.leverage.max(1.0);
            let notional = opened * fill.price;
            let margin = notional / leverage;
            let borrowed = notional - margin;
            pair.margin += margin - released_margin;
            pair.borrowed += borrowed - released_borrow;

            let item = self.funding.at_mut(quote);
            item.margin_used = (item.margin_used + margin - released_margin).max(0.0);
            item.borrowed = (item.borrowed + borrowed - released_borrow).max(0.0);
        }

        let pair = &mut self.pairs[idx];
        if !fill.closing_position && !fill.liquidation {
            match fill.direction {
                Direction::Buy => pair.bought_notional += fill.price * fill.amount,
                _ => pair.sold_notional += fill.price * fill.amount,
            }
        }

        debug!(
            key = %fill.key,
            direction = ?fill.direction,
            price = fill.price,
            amount = fill.amount,
            fee = fill.fee,
            "fill applied"
        );

        if spot && self.funding.at(quote).is_overdrawn() {
            let item = self.funding.at(quote);
            return Err(PortfolioError::InternalInconsistency(format!(
                "{} overdrawn: available {}",
                item.key, item.available
            )));
        }
        if opened_exposure {
            let free = self.free_collateral(quote);
            if free < -FUNDS_EPSILON {
                return Err(PortfolioError::InternalInconsistency(format!(
                    "{} over-committed: free collateral {free} after opening fill",
                    self.funding.at(quote).key
                )));
            }
        }
        if let Some(base) = funds.base {
            let item = self.funding.at(base);
            if item.available < -FUNDS_EPSILON {
                return Err(PortfolioError::InternalInconsistency(format!(
                    "{} went negative: {}",
                    item.key, item.available
                )));
            }
        }
        Ok(())
    }

    /// Apply a transfer request and describe it as a fill.
    pub fn transfer(
        &mut self,
        request: &FundTransfer,
        key: &PairKey,
        source: EventRef,
    ) -> Result<FillEvent, PortfolioError> {
        let from = FundingKey::pooled(&request.from_exchange, key.asset, &request.currency);
        let to = FundingKey::pooled(&request.to_exchange, key.asset, &request.currency);
        let fee = self.funding.transfer(request.amount, &from, &to)?;
        Ok(FillEvent {
            source,
            key: key.clone(),
            direction: Direction::TransferredFunds,
            price: 0.0,
            amount: request.amount,
            fee,
            net_value: request.amount,
            slippage_percent: 0.0,
            leverage: 1.0,
            allocated_funds: 0.0,
            closing_position: false,
            liquidation: false,
            exchange_order_id: None,
            reason: format!("transferred {} {} from {} to {}", request.amount, request.currency, from, to),
        })
    }

    /// Market orders that flatten every open position, in declaration order.
    ///
    /// Each order refers back to its pair's latest data event.
    pub fn closing_orders(&self, reason: &str) -> Vec<OrderEvent> {
        self.pairs
            .iter()
            .filter(|p| p.position.is_invested())
            .filter_map(|p| p.last_event.map(|source| (p, source)))
            .map(|(p, source)| OrderEvent {
                source,
                key: p.key.clone(),
                direction: if p.position.is_long() { Direction::Sell } else { Direction::Buy },
                kind: OrderKind::Market,
                price: p.last_price,
                amount: p.position.amount.abs(),
                leverage: 1.0,
                allocated_funds: 0.0,
                closing_position: true,
                liquidation: false,
                reason: reason.to_string(),
            })
            .collect()
    }

    /// Equity of a quote pool: cash plus the market value of the futures
    /// positions collateralised by it.
    pub fn pool_equity(&self, pool: usize) -> f64 {
        let item = self.funding.at(pool);
        let exposure: f64 = self
            .pairs
            .iter()
            .filter(|p| !p.is_spot() && p.funds.quote == pool)
            .map(|p| p.position.market_value(p.last_price))
            .sum();
        item.total() + exposure
    }

    /// Collateral a futures pool can still commit: equity less margin in use
    /// and funds already reserved.
    pub fn free_collateral(&self, pool: usize) -> f64 {
        let item = self.funding.at(pool);
        self.pool_equity(pool) - item.margin_used - item.reserved
    }

    /// Total value across all pools and positions, in mixed quote units.
    pub fn total_value(&self) -> f64 {
        let mut seen = Vec::new();
        let mut total = 0.0;
        for p in &self.pairs {
            if !seen.contains(&p.funds.quote) {
                seen.push(p.funds.quote);
                total += self.pool_equity(p.funds.quote);
            }
            if let Some(base) = p.funds.base {
                if !seen.contains(&base) {
                    seen.push(base);
                    total += self.funding.at(base).total() * p.last_price;
                }
            }
        }
        total
    }

    pub fn holding(&self, key: &PairKey, source: EventRef) -> Result<Holding, PortfolioError> {
        let pair = &self.pairs[self.pair_index(key)?];
        let quote = self.funding.at(pair.funds.quote);
        let base_funds = pair.funds.base.map(|b| self.funding.at(b).total());
        let total_value = match base_funds {
            Some(base) if pair.is_spot() => base * pair.last_price + quote.total(),
            _ => self.pool_equity(pair.funds.quote),
        };
        Ok(Holding {
            key: pair.key.clone(),
            offset: source.offset,
            timestamp: source.timestamp,
            price: pair.last_price,
            position: pair.position.clone(),
            market_value: pair.position.market_value(pair.last_price),
            unrealized_pnl: pair.position.unrealized_pnl(pair.last_price),
            base_funds,
            quote_available: quote.available,
            quote_reserved: quote.reserved,
            total_value,
        })
    }
}

/// Pair leverage settings, with unset rates taken from the portfolio.
fn merge_leverage(pair: &LeverageSettings, portfolio: &LeverageSettings) -> LeverageSettings {
    let pick = |own: f64, fallback: f64| if own > 0.0 { own } else { fallback };
    LeverageSettings {
        can_use_leverage: pair.can_use_leverage || portfolio.can_use_leverage,
        maximum_orders_with_leverage_ratio: pick(
            pair.maximum_orders_with_leverage_ratio,
            portfolio.maximum_orders_with_leverage_ratio,
        ),
        maximum_order_leverage_rate: pick(pair.maximum_order_leverage_rate, portfolio.maximum_order_leverage_rate),
        maximum_collateral_leverage_rate: pick(
            pair.maximum_collateral_leverage_rate,
            portfolio.maximum_collateral_leverage_rate,
        ),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::spot_config;
    use crate::config::{ExchangeLevelFunding, FundingSettings, FuturesDetails};
    use crate::domain::{Candle, CurrencyPair};
    use crate::event::{Observation, SignalEvent};
    use chrono::DateTime;

    pub(crate) fn candle_event(key: &PairKey, offset: u64, close: f64) -> DataEvent {
        DataEvent {
            offset,
            timestamp: DateTime::from_timestamp(1_700_000_000 + offset as i64 * 86_400, 0).unwrap(),
            key: key.clone(),
            interval_secs: 86_400,
            observation: Observation::Candle(Candle {
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000.0,
            }),
        }
    }

    /// One futures pair on a pooled USDT item with leverage enabled.
    pub(crate) fn futures_config(initial: f64) -> Config {
        let mut cfg = spot_config();
        let cs = &mut cfg.currency_settings[0];
        cs.asset = AssetClass::Futures;
        cs.spot_details = None;
        cs.futures_details = Some(FuturesDetails {
            leverage: LeverageSettings {
                can_use_leverage: true,
                maximum_orders_with_leverage_ratio: 0.0,
                maximum_order_leverage_rate: 10.0,
                maximum_collateral_leverage_rate: 0.0,
            },
        });
        cfg.funding_settings = FundingSettings {
            use_exchange_level_funding: true,
            exchange_level_funding: vec![ExchangeLevelFunding {
                exchange_name: "binance".into(),
                asset: AssetClass::Futures,
                currency: "USDT".into(),
                initial_funds: initial,
                transfer_fee: 0.0,
            }],
        };
        cfg
    }

    fn fill_for(order: &OrderEvent, price: f64) -> FillEvent {
        FillEvent::from_order(order, price, order.amount, 0.0)
    }

    fn size(p: &mut Portfolio, data: &DataEvent, signal: SignalEvent) -> OrderEvent {
        match p.on_signal(&signal, data).unwrap() {
            Sizing::Order(order) => order,
            Sizing::NoTrade(nt) => panic!("unexpected no-trade: {}", nt.reason),
        }
    }

    #[test]
    fn btc_usdt_buy_scenario() {
        // GIVEN BTC-USDT spot with base 1.0 and quote 10000, no fees or slippage
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut p = Portfolio::new(&cfg).unwrap();
        let data = candle_event(&key, 1, 20_000.0);
        p.update_market(&data).unwrap();

        // WHEN a buy of 0.1 at 20000 is sized and filled
        let order = size(&mut p, &data, SignalEvent::new(&data, Direction::Buy).with_amount(0.1));
        p.on_fill(&fill_for(&order, 20_000.0)).unwrap();

        // THEN the position is 0.1 and quote funds fell by 2000
        assert!((p.position(&key).unwrap().amount - 0.1).abs() < 1e-12);
        let quote = p.funding().quote(&key).unwrap();
        assert!((quote.available - 8_000.0).abs() < 1e-9);
        assert_eq!(quote.reserved, 0.0);
        assert!((p.funding().base(&key).unwrap().available - 1.1).abs() < 1e-12);
        assert!(p.is_long(&key));
    }

    #[test]
    fn release_returns_reservation() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut p = Portfolio::new(&cfg).unwrap();
        let data = candle_event(&key, 1, 100.0);
        let order = size(&mut p, &data, SignalEvent::new(&data, Direction::Buy).with_amount(10.0));
        assert!((p.funding().quote(&key).unwrap().reserved - 1_000.0).abs() < 1e-9);
        p.release(&order).unwrap();
        let quote = p.funding().quote(&key).unwrap();
        assert_eq!(quote.reserved, 0.0);
        assert!((quote.available - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_fill_is_internal_inconsistency() {
        let cfg = spot_config();
        let mut p = Portfolio::new(&cfg).unwrap();
        let other = PairKey::new("binance", AssetClass::Spot, CurrencyPair::new("ETH", "USDT"));
        let data = candle_event(&other, 1, 100.0);
        let order = OrderEvent {
            source: data.event_ref(),
            key: other,
            direction: Direction::Buy,
            kind: OrderKind::Market,
            price: 100.0,
            amount: 1.0,
            leverage: 1.0,
            allocated_funds: 0.0,
            closing_position: false,
            liquidation: false,
            reason: String::new(),
        };
        assert!(matches!(
            p.on_fill(&fill_for(&order, 100.0)),
            Err(PortfolioError::InternalInconsistency(_))
        ));
    }

    #[test]
    fn overdraft_without_leverage_is_fatal() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut p = Portfolio::new(&cfg).unwrap();
        let data = candle_event(&key, 1, 100.0);
        let mut order = size(&mut p, &data, SignalEvent::new(&data, Direction::Buy).with_amount(1.0));
        // Pretend the exchange filled far more than was reserved.
        order.amount = 500.0;
        assert!(matches!(
            p.on_fill(&fill_for(&order, 100.0)),
            Err(PortfolioError::InternalInconsistency(_))
        ));
    }

    #[test]
    fn leveraged_futures_borrow_and_repay() {
        let cfg = futures_config(1_000.0);
        let key = cfg.currency_settings[0].key();
        let mut p = Portfolio::new(&cfg).unwrap();
        let data = candle_event(&key, 1, 100.0);
        p.update_market(&data).unwrap();

        let order = size(
            &mut p,
            &data,
            SignalEvent::new(&data, Direction::Buy).with_amount(40.0).with_leverage(5.0),
        );
        assert!((order.allocated_funds - 800.0 * p.rules(&key).unwrap().fees.cost_factor(0.0)).abs() < 1e-6);
        p.on_fill(&FillEvent::from_order(&order, 100.0, 40.0, 0.0)).unwrap();

        let item = p.funding().quote(&key).unwrap();
        assert!((item.available + 3_000.0).abs() < 1e-6);
        assert!((item.borrowed - 3_200.0).abs() < 1e-6);
        assert!((item.margin_used - 800.0).abs() < 1e-6);
        assert!((p.pool_equity(p.funding().pair_funds(&key).unwrap().quote) - 1_000.0).abs() < 1e-6);

        // Close half: margin and borrowed shrink by half.
        let close = OrderEvent {
            direction: Direction::Sell,
            amount: 20.0,
            allocated_funds: 0.0,
            closing_position: true,
            ..order
        };
        p.on_fill(&FillEvent::from_order(&close, 110.0, 20.0, 0.0)).unwrap();
        let item = p.funding().quote(&key).unwrap();
        assert!((item.borrowed - 1_600.0).abs() < 1e-6);
        assert!((item.margin_used - 400.0).abs() < 1e-6);
        assert!((p.position(&key).unwrap().realized_pnl - 200.0).abs() < 1e-6);
    }

    #[test]
    fn closing_orders_flatten_positions() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut p = Portfolio::new(&cfg).unwrap();
        let data = candle_event(&key, 1, 100.0);
        p.update_market(&data).unwrap();
        assert!(p.closing_orders("exit").is_empty());

        let order = size(&mut p, &data, SignalEvent::new(&data, Direction::Buy).with_amount(2.0));
        p.on_fill(&fill_for(&order, 100.0)).unwrap();
        let closing = p.closing_orders("exit");
        assert_eq!(closing.len(), 1);
        assert_eq!(closing[0].direction, Direction::Sell);
        assert_eq!(closing[0].amount, 2.0);
        assert!(closing[0].closing_position);
    }

    #[test]
    fn holding_values_spot_pair() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut p = Portfolio::new(&cfg).unwrap();
        let data = candle_event(&key, 1, 20_000.0);
        p.update_market(&data).unwrap();
        let h = p.holding(&key, data.event_ref()).unwrap();
        assert!((h.total_value - 30_000.0).abs() < 1e-9);
        assert_eq!(h.base_funds, Some(1.0));
    }
}
