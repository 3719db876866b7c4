//! A single balance pool.

use crate::domain::{AssetClass, CurrencyPair};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::FundingError;

/// Tolerance for float comparisons on balances.
pub const FUNDS_EPSILON: f64 = 1e-9;

/// Identity of a funding item.
///
/// Pooled items are keyed by exchange, asset and currency. Isolated items
/// also carry the pair they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FundingKey {
    pub exchange: String,
    pub asset: AssetClass,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair: Option<CurrencyPair>,
}

impl FundingKey {
    pub fn pooled(exchange: &str, asset: AssetClass, currency: &str) -> Self {
        Self {
            exchange: exchange.trim().to_lowercase(),
            asset,
            currency: currency.trim().to_uppercase(),
            pair: None,
        }
    }

    pub fn isolated(exchange: &str, asset: AssetClass, currency: &str, pair: &CurrencyPair) -> Self {
        Self {
            pair: Some(pair.clone()),
            ..Self::pooled(exchange, asset, currency)
        }
    }
}

impl fmt::Display for FundingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.exchange, self.asset, self.currency)?;
        if let Some(pair) = &self.pair {
            write!(f, "[{pair}]")?;
        }
        Ok(())
    }
}

/// Balances for one currency pool.
///
/// `available + reserved` is the pool's cash. `available` may dip below
/// zero only for futures pools, whose solvency is judged on equity rather
/// than cash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingItem {
    pub key: FundingKey,
    pub initial: f64,
    pub available: f64,
    pub reserved: f64,
    pub transfer_fee: f64,
    pub margin_used: f64,
    pub borrowed: f64,
}

impl FundingItem {
    pub fn new(key: FundingKey, initial: f64, transfer_fee: f64) -> Result<Self, FundingError> {
        if initial < 0.0 || initial.is_nan() {
            return Err(FundingError::InvalidInitialFunds(initial));
        }
        Ok(Self {
            key,
            initial,
            available: initial,
            reserved: 0.0,
            transfer_fee,
            margin_used: 0.0,
            borrowed: 0.0,
        })
    }

    /// Cash held by the pool, reserved or not.
    pub fn total(&self) -> f64 {
        self.available + self.reserved
    }

    /// Move `amount` from available to reserved.
    pub fn reserve(&mut self, amount: f64) -> Result<(), FundingError> {
        self.reserve_within(amount, self.available)
    }

    /// Reserve against an explicit `headroom` instead of `available`.
    ///
    /// Leveraged pools size against free collateral, which can exceed a
    /// negative `available`.
    pub fn reserve_within(&mut self, amount: f64, headroom: f64) -> Result<(), FundingError> {
        if amount < 0.0 {
            return Err(FundingError::NegativeAmount(amount));
        }
        if amount > headroom + FUNDS_EPSILON {
            return Err(FundingError::InsufficientFunds {
                key: self.key.to_string(),
                needed: amount,
                available: headroom,
            });
        }
        self.available -= amount;
        self.reserved += amount;
        Ok(())
    }

    /// Move up to `amount` back from reserved to available.
    pub fn release(&mut self, amount: f64) {
        let amount = amount.max(0.0).min(self.reserved);
        self.reserved -= amount;
        self.available += amount;
        if self.reserved.abs() < FUNDS_EPSILON {
            self.reserved = 0.0;
        }
    }

    /// Signed change to available funds.
    pub fn adjust(&mut self, delta: f64) {
        self.available += delta;
    }

    /// Drop everything; used after a liquidation.
    pub fn wipe(&mut self) {
        self.available = 0.0;
        self.reserved = 0.0;
        self.margin_used = 0.0;
        self.borrowed = 0.0;
    }

    /// True when `available` has gone further negative than leverage allows.
    pub fn is_overdrawn(&self) -> bool {
        self.available < -(self.borrowed + FUNDS_EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(initial: f64) -> FundingItem {
        FundingItem::new(FundingKey::pooled("Binance", AssetClass::Spot, "usdt"), initial, 0.0).unwrap()
    }

    #[test]
    fn keys_are_normalised() {
        let key = FundingKey::pooled(" Binance", AssetClass::Spot, "usdt ");
        assert_eq!(key.exchange, "binance");
        assert_eq!(key.currency, "USDT");
        assert_eq!(key.to_string(), "binance/spot/USDT");
    }

    #[test]
    fn negative_initial_funds_rejected() {
        let err = FundingItem::new(FundingKey::pooled("x", AssetClass::Spot, "USD"), -1.0, 0.0);
        assert!(matches!(err, Err(FundingError::InvalidInitialFunds(_))));
    }

    #[test]
    fn reserve_and_release_preserve_total() {
        let mut it = item(100.0);
        it.reserve(40.0).unwrap();
        assert_eq!(it.available, 60.0);
        assert_eq!(it.reserved, 40.0);
        assert_eq!(it.total(), 100.0);
        it.release(40.0);
        assert_eq!(it.available, 100.0);
        assert_eq!(it.reserved, 0.0);
    }

    #[test]
    fn over_reservation_fails() {
        let mut it = item(10.0);
        assert!(matches!(
            it.reserve(11.0),
            Err(FundingError::InsufficientFunds { .. })
        ));
        assert_eq!(it.available, 10.0);
    }

    #[test]
    fn release_is_capped_at_reserved() {
        let mut it = item(10.0);
        it.reserve(5.0).unwrap();
        it.release(50.0);
        assert_eq!(it.available, 10.0);
        assert_eq!(it.reserved, 0.0);
    }

    #[test]
    fn overdraft_allowed_up_to_borrowed() {
        let mut it = item(10.0);
        it.borrowed = 20.0;
        it.adjust(-25.0);
        assert!(!it.is_overdrawn());
        it.adjust(-10.0);
        assert!(it.is_overdrawn());
    }
}
