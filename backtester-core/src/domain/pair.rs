//! Currency pairs, asset classes and the exchange/asset/pair key every
//! per-pair structure is indexed by.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Traded asset class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Spot,
    Futures,
}

impl AssetClass {
    pub fn is_futures(self) -> bool {
        matches!(self, AssetClass::Futures)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Spot => write!(f, "spot"),
            AssetClass::Futures => write!(f, "futures"),
        }
    }
}

/// Base/quote currency pair. Currency codes are stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            base: base.as_ref().trim().to_uppercase(),
            quote: quote.as_ref().trim().to_uppercase(),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PairError {
    #[error("'{0}' is not a currency pair (expected BASE-QUOTE)")]
    Malformed(String),
}

impl FromStr for CurrencyPair {
    type Err = PairError;

    /// Accepts `BTC-USDT`, `BTC/USDT` and `BTC_USDT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(['-', '/', '_']);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.trim().is_empty() && !quote.trim().is_empty() => {
                Ok(CurrencyPair::new(base, quote))
            }
            _ => Err(PairError::Malformed(s.to_string())),
        }
    }
}

/// Identity of one traded instrument: exchange + asset class + pair.
///
/// Exchange names are case-insensitive and stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub exchange: String,
    pub asset: AssetClass,
    pub pair: CurrencyPair,
}

impl PairKey {
    pub fn new(exchange: impl AsRef<str>, asset: AssetClass, pair: CurrencyPair) -> Self {
        Self {
            exchange: exchange.as_ref().trim().to_lowercase(),
            asset,
            pair,
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.exchange, self.asset, self.pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_normalised_to_uppercase() {
        let pair = CurrencyPair::new("btc", " usdt ");
        assert_eq!(pair.base, "BTC");
        assert_eq!(pair.quote, "USDT");
        assert_eq!(pair.to_string(), "BTC-USDT");
    }

    #[test]
    fn pair_parses_common_separators() {
        for raw in ["BTC-USDT", "btc/usdt", "BTC_USDT"] {
            assert_eq!(raw.parse::<CurrencyPair>().unwrap(), CurrencyPair::new("BTC", "USDT"));
        }
    }

    #[test]
    fn pair_rejects_malformed_input() {
        assert!("BTCUSDT".parse::<CurrencyPair>().is_err());
        assert!("BTC-".parse::<CurrencyPair>().is_err());
        assert!("A-B-C".parse::<CurrencyPair>().is_err());
    }

    #[test]
    fn key_exchange_is_case_insensitive() {
        let a = PairKey::new("Binance", AssetClass::Spot, CurrencyPair::new("BTC", "USDT"));
        let b = PairKey::new("binance", AssetClass::Spot, CurrencyPair::new("btc", "usdt"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "binance/spot/BTC-USDT");
    }
}
