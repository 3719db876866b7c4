//! Sizing: turning a strategy signal into an order, or a reasoned no-trade.
//!
//! Checks run in a fixed order: direction, price, leverage, available
//! funds, amount limits, holdings ratio, collateral. The first failing check
//! becomes the no-trade reason. An accepted order reserves its worst-case
//! cost before it is returned.

use super::{PairRules, Portfolio, PortfolioError};
use crate::domain::AMOUNT_EPSILON;
use crate::event::{DataEvent, Direction, OrderEvent, OrderKind, SignalEvent};
use crate::funding::{FundingError, FUNDS_EPSILON};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A signal the portfolio declined to trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoTrade {
    pub direction: Direction,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sizing {
    Order(OrderEvent),
    NoTrade(NoTrade),
}

impl Sizing {
    pub fn order(&self) -> Option<&OrderEvent> {
        match self {
            Sizing::Order(order) => Some(order),
            Sizing::NoTrade(_) => None,
        }
    }
}

fn reject(direction: Direction, reason: impl Into<String>) -> Result<Sizing, PortfolioError> {
    Ok(Sizing::NoTrade(NoTrade { direction: direction.rejected(), reason: reason.into() }))
}

/// Lowest and highest price the simulator can fill at: the reference
/// clamped into the candle when volume fitting applies, then moved against
/// the order by up to the maximum slippage.
fn fill_band(rules: &PairRules, direction: Direction, price: f64, data: &DataEvent) -> (f64, f64) {
    let reference = match data.candle() {
        Some(candle) if !rules.skip_volume_fitting => price.clamp(candle.low, candle.high),
        _ => price,
    };
    let slip = rules.max_slippage_percent / 100.0;
    match direction {
        Direction::Buy => (reference, reference * (1.0 + slip)),
        _ => (reference * (1.0 - slip), reference),
    }
}

impl Portfolio {
    /// Size `signal` against current funds and limits.
    ///
    /// Returns `Err` only for pairs the portfolio does not know. Every other
    /// refusal is a [`Sizing::NoTrade`] carrying its reason.
    pub fn on_signal(&mut self, signal: &SignalEvent, data: &DataEvent) -> Result<Sizing, PortfolioError> {
        let idx = self.pair_index(&signal.key)?;
        let direction = signal.direction;

        if !direction.is_trade() {
            let reason = if signal.reason.is_empty() { "no action".to_string() } else { signal.reason.clone() };
            return Ok(Sizing::NoTrade(NoTrade { direction, reason }));
        }

        let price = signal.price.unwrap_or_else(|| data.close_price());
        if !(price > 0.0 && price.is_finite()) {
            return reject(direction, format!("no valid price ({price})"));
        }

        let pair = &self.pairs[idx];
        let rules = pair.rules.clone();
        let spot = pair.is_spot();
        let side = match direction {
            Direction::Buy => rules.buy,
            _ => rules.sell,
        };

        // Leverage.
        let leverage = signal.leverage.unwrap_or(1.0);
        if !(leverage >= 1.0) {
            return reject(direction, format!("leverage {leverage} below 1"));
        }
        let leveraged = leverage > 1.0;
        if leveraged {
            if spot || !rules.leverage.can_use_leverage {
                return reject(direction, "leverage not allowed");
            }
            let max_rate = rules.leverage.maximum_order_leverage_rate;
            if max_rate > 0.0 && leverage > max_rate {
                return reject(direction, format!("leverage {leverage} above maximum {max_rate}"));
            }
            let max_ratio = rules.leverage.maximum_orders_with_leverage_ratio;
            if max_ratio > 0.0 {
                let ratio = (self.leveraged_orders + 1) as f64 / (self.orders_placed + 1) as f64;
                if ratio > max_ratio {
                    return reject(
                        direction,
                        format!("leveraged order ratio {ratio:.4} above maximum {max_ratio}"),
                    );
                }
            }
        }

        // Funds the order is sized against.
        let spot_sell = spot && direction == Direction::Sell;
        let pool = match (spot_sell, pair.funds.base) {
            (true, Some(base)) => base,
            _ => pair.funds.quote,
        };
        let funds = if spot { self.funding.at(pool).available } else { self.free_collateral(pool) };
        if funds <= FUNDS_EPSILON {
            return reject(direction, format!("no funds available in {}", self.funding.at(pool).key));
        }

        // Amount.
        let cost_factor = rules.fees.cost_factor(rules.max_slippage_percent);
        let cumulative = match direction {
            Direction::Buy => pair.bought_notional,
            _ => pair.sold_notional,
        };
        let amount = match signal.amount {
            Some(hint) => {
                if !(hint > 0.0) {
                    return reject(direction, format!("amount {hint} is not positive"));
                }
                if side.maximum_size > 0.0 && hint > side.maximum_size {
                    return reject(direction, format!("amount {hint} above maximum size {}", side.maximum_size));
                }
                if side.maximum_total > 0.0 && cumulative + hint * price > side.maximum_total + FUNDS_EPSILON {
                    return reject(direction, format!("maximum total {} breached", side.maximum_total));
                }
                hint
            }
            None => {
                let mut amount = if spot_sell { funds } else { funds * leverage / (price * cost_factor) };
                if side.maximum_size > 0.0 {
                    amount = amount.min(side.maximum_size);
                }
                if side.maximum_total > 0.0 {
                    let headroom = side.maximum_total - cumulative;
                    if headroom <= FUNDS_EPSILON {
                        return reject(direction, format!("maximum total {} reached", side.maximum_total));
                    }
                    amount = amount.min(headroom / price);
                }
                amount
            }
        };
        if amount <= AMOUNT_EPSILON || amount < side.minimum_size {
            return reject(direction, format!("amount {amount} below minimum size {}", side.minimum_size));
        }

        // Portfolio-level rules.
        let signed = direction.sign() * amount;
        if let Some(reason) = self.holdings_ratio_breach(idx, signed, price) {
            return reject(direction, reason);
        }
        let kind = if signal.price.is_some() { OrderKind::Limit } else { OrderKind::Market };
        let band = fill_band(&rules, direction, price, data);
        if let Some(reason) = self.collateral_breach(idx, signed, band, rules.fees.rate(kind)) {
            return reject(direction, reason);
        }

        // Reserve.
        let allocated = if spot_sell { amount } else { price * amount * cost_factor / leverage };
        match self.funding.at_mut(pool).reserve_within(allocated, funds) {
            Ok(()) => {}
            Err(FundingError::InsufficientFunds { needed, available, .. }) => {
                return reject(direction, format!("insufficient funds: need {needed:.8}, have {available:.8}"));
            }
            Err(other) => return Err(other.into()),
        }

        self.orders_placed += 1;
        if leveraged {
            self.leveraged_orders += 1;
        }
        debug!(key = %signal.key, ?direction, amount, price, allocated, "order sized");

        Ok(Sizing::Order(OrderEvent {
            source: signal.source,
            key: signal.key.clone(),
            direction,
            kind,
            price,
            amount,
            leverage,
            allocated_funds: allocated,
            closing_position: false,
            liquidation: false,
            reason: signal.reason.clone(),
        }))
    }
}
