//! The funding ledger: every balance pool of one run.

use super::item::{FundingItem, FundingKey, FUNDS_EPSILON};
use super::FundingError;
use crate::config::Config;
use crate::domain::{AssetClass, PairKey};
use std::collections::HashMap;
use tracing::debug;

/// Indices of the pools a pair trades against.
///
/// Futures pairs have no base pool; their exposure lives in the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairFunds {
    pub base: Option<usize>,
    pub quote: usize,
}

#[derive(Debug, Clone)]
pub struct FundingLedger {
    pooled: bool,
    items: Vec<FundingItem>,
    index: HashMap<FundingKey, usize>,
    pairs: HashMap<PairKey, PairFunds>,
}

impl FundingLedger {
    /// Build pools from the funding and currency settings.
    ///
    /// Pooled mode creates one item per configured `(exchange, asset,
    /// currency)` plus zero-balance items for spot base currencies that have
    /// no explicit entry. Isolated mode gives every pair its own base and
    /// quote item, seeded from `spot_details`.
    pub fn from_config(cfg: &Config) -> Result<Self, FundingError> {
        let mut ledger = Self {
            pooled: cfg.funding_settings.use_exchange_level_funding,
            items: Vec::new(),
            index: HashMap::new(),
            pairs: HashMap::new(),
        };

        if ledger.pooled {
            for f in &cfg.funding_settings.exchange_level_funding {
                let key = FundingKey::pooled(&f.exchange_name, f.asset, &f.currency);
                ledger.insert(FundingItem::new(key, f.initial_funds, f.transfer_fee)?)?;
            }
        }

        for cs in &cfg.currency_settings {
            let pair_key = cs.key();
            let funds = if ledger.pooled {
                let quote_key = FundingKey::pooled(&pair_key.exchange, cs.asset, &pair_key.pair.quote);
                let quote = ledger.position_of(&quote_key)?;
                let base = match cs.asset {
                    AssetClass::Spot => {
                        let base_key =
                            FundingKey::pooled(&pair_key.exchange, cs.asset, &pair_key.pair.base);
                        Some(match ledger.index.get(&base_key) {
                            Some(&idx) => idx,
                            None => ledger.insert(FundingItem::new(base_key, 0.0, 0.0)?)?,
                        })
                    }
                    AssetClass::Futures => None,
                };
                PairFunds { base, quote }
            } else {
                let spot = cs.spot_details.unwrap_or_default();
                let base_key =
                    FundingKey::isolated(&pair_key.exchange, cs.asset, &pair_key.pair.base, &pair_key.pair);
                let quote_key =
                    FundingKey::isolated(&pair_key.exchange, cs.asset, &pair_key.pair.quote, &pair_key.pair);
                let base = ledger.insert(FundingItem::new(base_key, spot.initial_base_funds, 0.0)?)?;
                let quote = ledger.insert(FundingItem::new(quote_key, spot.initial_quote_funds, 0.0)?)?;
                PairFunds { base: Some(base), quote }
            };
            ledger.pairs.insert(pair_key, funds);
        }

        debug!(items = ledger.items.len(), pooled = ledger.pooled, "funding ledger built");
        Ok(ledger)
    }

    fn insert(&mut self, item: FundingItem) -> Result<usize, FundingError> {
        if self.index.contains_key(&item.key) {
            return Err(FundingError::Duplicate(item.key.to_string()));
        }
        let idx = self.items.len();
        self.index.insert(item.key.clone(), idx);
        self.items.push(item);
        Ok(idx)
    }

    fn position_of(&self, key: &FundingKey) -> Result<usize, FundingError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| FundingError::NotFound(key.to_string()))
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub fn items(&self) -> &[FundingItem] {
        &self.items
    }

    pub fn item(&self, key: &FundingKey) -> Option<&FundingItem> {
        self.index.get(key).map(|&i| &self.items[i])
    }

    pub fn pair_funds(&self, pair: &PairKey) -> Option<PairFunds> {
        self.pairs.get(pair).copied()
    }

    pub fn at(&self, idx: usize) -> &FundingItem {
        &self.items[idx]
    }

    pub fn at_mut(&mut self, idx: usize) -> &mut FundingItem {
        &mut self.items[idx]
    }

    pub fn quote(&self, pair: &PairKey) -> Option<&FundingItem> {
        self.pair_funds(pair).map(|f| &self.items[f.quote])
    }

    pub fn base(&self, pair: &PairKey) -> Option<&FundingItem> {
        self.pair_funds(pair).and_then(|f| f.base).map(|i| &self.items[i])
    }

    /// Overwrite the starting balance of a pool before trading begins.
    pub fn set_initial_funds(&mut self, key: &FundingKey, amount: f64) -> Result<(), FundingError> {
        if amount < 0.0 || amount.is_nan() {
            return Err(FundingError::InvalidInitialFunds(amount));
        }
        let idx = self.position_of(key)?;
        let item = &mut self.items[idx];
        item.initial = amount;
        item.available = amount - item.reserved;
        Ok(())
    }

    /// Available balance of a pool.
    pub fn funds(&self, key: &FundingKey) -> Result<f64, FundingError> {
        Ok(self.items[self.position_of(key)?].available)
    }

    pub fn initial_funds(&self, key: &FundingKey) -> Result<f64, FundingError> {
        Ok(self.items[self.position_of(key)?].initial)
    }

    /// Move `amount` between two pools of the same currency on different
    /// exchanges. The sender pays its flat `transfer_fee` on top.
    ///
    /// Returns the fee charged.
    pub fn transfer(&mut self, amount: f64, from: &FundingKey, to: &FundingKey) -> Result<f64, FundingError> {
        if !self.pooled {
            return Err(FundingError::ExchangeLevelFundingDisabled);
        }
        if amount <= 0.0 || amount.is_nan() {
            return Err(FundingError::NegativeAmount(amount));
        }
        if from.currency != to.currency {
            return Err(FundingError::CurrencyMismatch {
                from: from.currency.clone(),
                to: to.currency.clone(),
            });
        }
        if from.exchange == to.exchange {
            return Err(FundingError::SameExchange(from.exchange.clone()));
        }
        let src = self.position_of(from)?;
        let dst = self.position_of(to)?;

        let fee = self.items[src].transfer_fee;
        let needed = amount + fee;
        if needed > self.items[src].available + FUNDS_EPSILON {
            return Err(FundingError::InsufficientFunds {
                key: from.to_string(),
                needed,
                available: self.items[src].available,
            });
        }
        self.items[src].adjust(-needed);
        self.items[dst].adjust(amount);
        debug!(%from, %to, amount, fee, "funds transferred");
        Ok(fee)
    }

    /// Zero every pool on `exchange`.
    pub fn wipe_exchange(&mut self, exchange: &str) {
        for item in self.items.iter_mut().filter(|i| i.key.exchange == exchange) {
            item.wipe();
        }
    }
}
