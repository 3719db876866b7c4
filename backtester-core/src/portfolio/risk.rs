//! Portfolio-level risk rules: holdings concentration, collateral leverage
//! and liquidation of under-water leveraged pools.

use super::Portfolio;
use crate::event::{Direction, FillEvent, OrderEvent, OrderKind};
use tracing::warn;

impl Portfolio {
    /// Reason text when taking `signed` more of pair `idx` at `price` would
    /// push its share of total value past `maximum_holdings_ratio`.
    ///
    /// Only applies with a non-zero ratio and more than one configured pair.
    pub(super) fn holdings_ratio_breach(&self, idx: usize, signed: f64, price: f64) -> Option<String> {
        let max_ratio = self.pairs[idx].rules.maximum_holdings_ratio;
        if max_ratio <= 0.0 || self.pairs.len() < 2 {
            return None;
        }
        let total = self.total_value();
        if total <= 0.0 {
            return None;
        }
        let exposure = (self.pairs[idx].position.amount + signed).abs() * price;
        let ratio = exposure / total;
        (ratio > max_ratio).then(|| format!("holdings ratio {ratio:.4} above maximum {max_ratio}"))
    }

    /// Reason text when the pool's total notional after the order would
    /// exceed `maximum_collateral_leverage_rate` times its equity.
    ///
    /// The fill can land anywhere in `band`. It marks the pair to the fill
    /// price and its fee comes out of equity. Notional and equity are both
    /// linear in the fill price, so the two ends of the band bound the rule.
    /// Only applies to pairs that may use leverage and have a non-zero rate.
    pub(super) fn collateral_breach(&self, idx: usize, signed: f64, band: (f64, f64), fee_rate: f64) -> Option<String> {
        let pair = &self.pairs[idx];
        let rate = pair.rules.leverage.maximum_collateral_leverage_rate;
        if pair.is_spot() || !pair.rules.leverage.can_use_leverage || rate <= 0.0 {
            return None;
        }
        let pool = pair.funds.quote;
        let others: f64 = self
            .pairs
            .iter()
            .enumerate()
            .filter(|(i, p)| *i != idx && !p.is_spot() && p.funds.quote == pool)
            .map(|(_, p)| p.position.amount.abs() * p.last_price)
            .sum();
        let equity_now = self.pool_equity(pool);
        let held = pair.position.amount;

        [band.1, band.0].into_iter().find_map(|fill_price| {
            let notional = others + (held + signed).abs() * fill_price;
            let fee = fee_rate * fill_price * signed.abs();
            let equity = equity_now + held * (fill_price - pair.last_price) - fee;
            let limit = rate * equity.max(0.0);
            (notional > limit).then(|| {
                format!(
                    "notional {notional:.8} at {fill_price:.8} above collateral limit {limit:.8} ({rate}x equity {equity:.8})"
                )
            })
        })
    }

    /// Liquidate every pool whose leveraged equity has fallen to zero.
    ///
    /// All open positions on the pool's exchange are closed at their last
    /// price, then the exchange's pools are wiped. Returns the generated
    /// liquidation orders with their fills, in declaration order, each
    /// filed under its pair's latest data event.
    pub fn check_liquidation(&mut self) -> Vec<(OrderEvent, FillEvent)> {
        let mut pools: Vec<usize> = Vec::new();
        for p in &self.pairs {
            if !p.is_spot() && p.position.is_invested() && !pools.contains(&p.funds.quote) {
                pools.push(p.funds.quote);
            }
        }

        let mut out = Vec::new();
        for pool in pools {
            let equity = self.pool_equity(pool);
            let item = self.funding.at(pool);
            if equity > 0.0 || item.borrowed <= 0.0 {
                continue;
            }
            let exchange = item.key.exchange.clone();
            warn!(pool = %item.key, equity, "leveraged pool under water, liquidating");

            for pair in self.pairs.iter_mut().filter(|p| p.key.exchange == exchange) {
                let Some(source) = pair.last_event.filter(|_| pair.position.is_invested()) else {
                    continue;
                };
                let order = OrderEvent {
                    source,
                    key: pair.key.clone(),
                    direction: if pair.position.is_long() { Direction::Sell } else { Direction::Buy },
                    kind: OrderKind::Market,
                    price: pair.last_price,
                    amount: pair.position.amount.abs(),
                    leverage: 1.0,
                    allocated_funds: 0.0,
                    closing_position: true,
                    liquidation: true,
                    reason: format!("liquidated: {exchange} equity {equity:.8}"),
                };
                let fill = FillEvent::from_order(&order, pair.last_price, order.amount, 0.0);
                pair.position.apply(fill.signed_amount(), fill.price);
                pair.margin = 0.0;
                pair.borrowed = 0.0;
                out.push((order, fill));
            }
            self.funding.wipe_exchange(&exchange);
        }
        out
    }
}
