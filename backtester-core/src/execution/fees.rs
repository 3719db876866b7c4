//! Fee schedule: maker/taker rates per pair.
//!
//! Market orders pay the taker rate, limit orders the maker rate. Rates
//! come from the pair's overrides when set, otherwise from the default
//! schedule for its asset class.

use crate::config::CurrencySettings;
use crate::domain::AssetClass;
use crate::event::OrderKind;

/// Default spot rates (fractions, not percent).
pub const SPOT_MAKER_FEE: f64 = 0.001;
pub const SPOT_TAKER_FEE: f64 = 0.002;
/// Default futures rates.
pub const FUTURES_MAKER_FEE: f64 = 0.0002;
pub const FUTURES_TAKER_FEE: f64 = 0.0005;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub maker: f64,
    pub taker: f64,
}

impl FeeSchedule {
    pub fn new(maker: f64, taker: f64) -> Self {
        Self { maker, taker }
    }

    pub fn frictionless() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn default_for(asset: AssetClass) -> Self {
        match asset {
            AssetClass::Spot => Self::new(SPOT_MAKER_FEE, SPOT_TAKER_FEE),
            AssetClass::Futures => Self::new(FUTURES_MAKER_FEE, FUTURES_TAKER_FEE),
        }
    }

    pub fn for_pair(settings: &CurrencySettings) -> Self {
        let defaults = Self::default_for(settings.asset);
        Self {
            maker: settings.maker_fee_override.unwrap_or(defaults.maker),
            taker: settings.taker_fee_override.unwrap_or(defaults.taker),
        }
    }

    pub fn rate(&self, kind: OrderKind) -> f64 {
        match kind {
            OrderKind::Market => self.taker,
            OrderKind::Limit => self.maker,
        }
    }

    /// `fee = rate * price * amount`
    pub fn compute(&self, kind: OrderKind, price: f64, amount: f64) -> f64 {
        self.rate(kind) * price * amount
    }

    /// Worst-case cost per unit of notional: maximum slippage plus taker fee.
    ///
    /// Sizing divides funds by `price * cost_factor` so the executed cost can
    /// never exceed the reservation.
    pub fn cost_factor(&self, max_slippage_percent: f64) -> f64 {
        (1.0 + max_slippage_percent / 100.0) * (1.0 + self.taker.max(self.maker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::spot_config;

    #[test]
    fn frictionless_charges_nothing() {
        let fees = FeeSchedule::frictionless();
        assert_eq!(fees.compute(OrderKind::Market, 100.0, 50.0), 0.0);
        assert_eq!(fees.cost_factor(0.0), 1.0);
    }

    #[test]
    fn default_schedule_by_asset() {
        let spot = FeeSchedule::default_for(AssetClass::Spot);
        assert_eq!(spot.rate(OrderKind::Market), 0.002);
        assert_eq!(spot.rate(OrderKind::Limit), 0.001);
        let futures = FeeSchedule::default_for(AssetClass::Futures);
        assert_eq!(futures.rate(OrderKind::Market), 0.0005);
        assert_eq!(futures.rate(OrderKind::Limit), 0.0002);
    }

    #[test]
    fn overrides_take_precedence() {
        let mut cs = spot_config().currency_settings.remove(0);
        cs.maker_fee_override = None;
        cs.taker_fee_override = Some(0.01);
        let fees = FeeSchedule::for_pair(&cs);
        assert_eq!(fees.taker, 0.01);
        assert_eq!(fees.maker, SPOT_MAKER_FEE);
    }

    #[test]
    fn commission_calculation() {
        let fees = FeeSchedule::new(0.0, 0.0005);
        // 100 * 1000 * 0.0005 = 50
        assert!((fees.compute(OrderKind::Market, 100.0, 1000.0) - 50.0).abs() < 1e-10);
    }

    #[test]
    fn cost_factor_covers_slippage_and_fee() {
        let fees = FeeSchedule::new(0.001, 0.002);
        assert!((fees.cost_factor(1.0) - 1.01 * 1.002).abs() < 1e-12);
    }
}
