//! Strategy run configuration.
//!
//! A [`Config`] is everything needed to reproduce a run: the strategy, the
//! traded pairs with their limits and fees, the funding model, the data
//! source and the statistics settings. It is deserialised from `.strat`
//! files (TOML or JSON) and validated structurally by [`Config::validate`].
//! Checks that need live collaborators (strategy registry, gateways, candle
//! store) happen when the run manager builds the engine.

use crate::domain::{AssetClass, CurrencyPair, PairKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub goal: String,
    pub strategy_settings: StrategySettings,
    pub currency_settings: Vec<CurrencySettings>,
    #[serde(default)]
    pub funding_settings: FundingSettings,
    pub data_settings: DataSettings,
    #[serde(default)]
    pub portfolio_settings: PortfolioSettings,
    #[serde(default)]
    pub statistic_settings: StatisticSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySettings {
    pub name: String,
    #[serde(default)]
    pub use_simultaneous_signal_processing: bool,
    /// Strategy-specific knobs. `BTreeMap` keeps serialisation order stable
    /// for fingerprinting.
    #[serde(default)]
    pub custom_settings: BTreeMap<String, serde_json::Value>,
}

/// Size limits for one side of the book.
///
/// Zero means "not set": a zero maximum is unlimited and, for per-pair
/// limits, a zero field falls back to the portfolio default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideLimits {
    pub minimum_size: f64,
    pub maximum_size: f64,
    pub maximum_total: f64,
}

impl SideLimits {
    /// Per-field fallback: keep our value when set, otherwise take `defaults`.
    pub fn or(&self, defaults: &SideLimits) -> SideLimits {
        let pick = |own: f64, fallback: f64| if own > 0.0 { own } else { fallback };
        SideLimits {
            minimum_size: pick(self.minimum_size, defaults.minimum_size),
            maximum_size: pick(self.maximum_size, defaults.maximum_size),
            maximum_total: pick(self.maximum_total, defaults.maximum_total),
        }
    }

    fn validate(&self, what: &str) -> Result<(), ConfigError> {
        if self.minimum_size < 0.0 || self.maximum_size < 0.0 || self.maximum_total < 0.0 {
            return Err(invalid(format!("{what}: size limits must be non-negative")));
        }
        if self.maximum_size > 0.0 && self.minimum_size > self.maximum_size {
            return Err(invalid(format!(
                "{what}: minimum_size {} exceeds maximum_size {}",
                self.minimum_size, self.maximum_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeverageSettings {
    pub can_use_leverage: bool,
    /// Fraction of open orders allowed to carry leverage, in `[0, 1]`.
    pub maximum_orders_with_leverage_ratio: f64,
    /// Highest leverage a single order may use. 0 = unlimited.
    pub maximum_order_leverage_rate: f64,
    /// Total notional may not exceed this multiple of collateral. 0 = unlimited.
    pub maximum_collateral_leverage_rate: f64,
}

impl LeverageSettings {
    fn validate(&self, what: &str) -> Result<(), ConfigError> {
        if self.maximum_order_leverage_rate < 0.0 || self.maximum_collateral_leverage_rate < 0.0 {
            return Err(invalid(format!("{what}: leverage rates must be non-negative")));
        }
        if !(0.0..=1.0).contains(&self.maximum_orders_with_leverage_ratio) {
            return Err(invalid(format!(
                "{what}: maximum_orders_with_leverage_ratio must be within [0, 1]"
            )));
        }
        if !self.can_use_leverage && self.maximum_order_leverage_rate > 1.0 {
            return Err(invalid(format!(
                "{what}: leverage rate above 1 requires can_use_leverage"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotDetails {
    pub initial_base_funds: f64,
    pub initial_quote_funds: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuturesDetails {
    pub leverage: LeverageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencySettings {
    pub exchange_name: String,
    pub asset: AssetClass,
    pub base: String,
    pub quote: String,
    #[serde(default)]
    pub buy_side: SideLimits,
    #[serde(default)]
    pub sell_side: SideLimits,
    #[serde(default)]
    pub min_slippage_percent: f64,
    #[serde(default)]
    pub max_slippage_percent: f64,
    #[serde(default)]
    pub maker_fee_override: Option<f64>,
    #[serde(default)]
    pub taker_fee_override: Option<f64>,
    /// Largest share of total holdings value this pair may take. 0 = unlimited.
    #[serde(default)]
    pub maximum_holdings_ratio: f64,
    #[serde(default)]
    pub skip_candle_volume_fitting: bool,
    #[serde(default)]
    pub spot_details: Option<SpotDetails>,
    #[serde(default)]
    pub futures_details: Option<FuturesDetails>,
}

impl CurrencySettings {
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(&self.base, &self.quote)
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(&self.exchange_name, self.asset, self.pair())
    }

    fn validate(&self, pooled: bool) -> Result<(), ConfigError> {
        let key = self.key();
        if self.exchange_name.trim().is_empty() {
            return Err(invalid("currency setting has an empty exchange_name"));
        }
        if self.base.trim().is_empty() || self.quote.trim().is_empty() {
            return Err(invalid(format!("{key}: base and quote must be set")));
        }
        self.buy_side.validate(&format!("{key} buy_side"))?;
        self.sell_side.validate(&format!("{key} sell_side"))?;

        let (min, max) = (self.min_slippage_percent, self.max_slippage_percent);
        if !(0.0 <= min && min <= max && max < 100.0) {
            return Err(invalid(format!(
                "{key}: slippage must satisfy 0 <= min ({min}) <= max ({max}) < 100"
            )));
        }
        for fee in [self.maker_fee_override, self.taker_fee_override].into_iter().flatten() {
            if fee < 0.0 {
                return Err(invalid(format!("{key}: fee overrides must be non-negative")));
            }
        }
        if !(0.0..=1.0).contains(&self.maximum_holdings_ratio) {
            return Err(invalid(format!("{key}: maximum_holdings_ratio must be within [0, 1]")));
        }

        match self.asset {
            AssetClass::Spot => {
                if self.futures_details.is_some() {
                    return Err(invalid(format!("{key}: futures_details set on a spot pair")));
                }
                match (&self.spot_details, pooled) {
                    (None, false) => {
                        return Err(invalid(format!(
                            "{key}: spot pairs need spot_details when exchange level funding is off"
                        )))
                    }
                    (Some(spot), _) if spot.initial_base_funds < 0.0 || spot.initial_quote_funds < 0.0 => {
                        return Err(invalid(format!("{key}: initial funds must be non-negative")))
                    }
                    _ => {}
                }
            }
            AssetClass::Futures => {
                if !pooled {
                    return Err(invalid(format!(
                        "{key}: futures pairs require exchange level funding"
                    )));
                }
                if let Some(details) = &self.futures_details {
                    details.leverage.validate(&format!("{key} leverage"))?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingSettings {
    pub use_exchange_level_funding: bool,
    pub exchange_level_funding: Vec<ExchangeLevelFunding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeLevelFunding {
    pub exchange_name: String,
    pub asset: AssetClass,
    pub currency: String,
    pub initial_funds: f64,
    #[serde(default)]
    pub transfer_fee: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Candle,
    Trade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub inclusive_end_date: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvData {
    /// A single CSV file (one pair configured) or a directory holding
    /// `{exchange}_{asset}_{BASE-QUOTE}.csv` files.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveData {
    pub new_event_timeout_secs: u64,
    pub data_check_interval_ms: u64,
    pub close_positions_on_exit: bool,
    pub max_consecutive_failures: u32,
}

impl Default for LiveData {
    fn default() -> Self {
        Self {
            new_event_timeout_secs: 60,
            data_check_interval_ms: 1000,
            close_positions_on_exit: false,
            max_consecutive_failures: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    pub interval_secs: u64,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub api_data: Option<DateRange>,
    #[serde(default)]
    pub csv_data: Option<CsvData>,
    #[serde(default)]
    pub database_data: Option<DateRange>,
    #[serde(default)]
    pub live_data: Option<LiveData>,
}

/// The single configured data source, borrowed from [`DataSettings`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataSource<'a> {
    Api(&'a DateRange),
    Csv(&'a CsvData),
    Database(&'a DateRange),
    Live(&'a LiveData),
}

impl DataSettings {
    pub fn source(&self) -> Result<DataSource<'_>, ConfigError> {
        let mut sources = Vec::with_capacity(1);
        if let Some(range) = &self.api_data {
            sources.push(DataSource::Api(range));
        }
        if let Some(csv) = &self.csv_data {
            sources.push(DataSource::Csv(csv));
        }
        if let Some(range) = &self.database_data {
            sources.push(DataSource::Database(range));
        }
        if let Some(live) = &self.live_data {
            sources.push(DataSource::Live(live));
        }
        match sources.as_slice() {
            [one] => Ok(*one),
            [] => Err(invalid("no data source set")),
            _ => Err(invalid("exactly one data source may be set")),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live_data.is_some()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(invalid("data_settings.interval_secs must be positive"));
        }
        match self.source()? {
            DataSource::Api(range) | DataSource::Database(range) => {
                if range.start_date >= range.end_date {
                    return Err(invalid("start_date must be before end_date"));
                }
                if self.data_type != DataType::Candle {
                    return Err(invalid("historical sources only provide candle data"));
                }
            }
            DataSource::Csv(csv) => {
                if csv.path.as_os_str().is_empty() {
                    return Err(invalid("csv_data.path is empty"));
                }
                if self.data_type != DataType::Candle {
                    return Err(invalid("historical sources only provide candle data"));
                }
            }
            DataSource::Live(live) => {
                if live.new_event_timeout_secs == 0 || live.data_check_interval_ms == 0 {
                    return Err(invalid("live_data timeouts must be positive"));
                }
                if live.max_consecutive_failures == 0 {
                    return Err(invalid("live_data.max_consecutive_failures must be positive"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioSettings {
    pub leverage: LeverageSettings,
    pub buy_side: SideLimits,
    pub sell_side: SideLimits,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticSettings {
    /// Annual risk-free rate used by Sharpe and Sortino.
    pub risk_free_rate: f64,
}

impl Config {
    /// Structural validation. Does not consult any registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategy_settings.name.trim().is_empty() {
            return Err(invalid("strategy_settings.name is empty"));
        }
        if self.currency_settings.is_empty() {
            return Err(invalid("currency_settings is empty"));
        }

        let pooled = self.funding_settings.use_exchange_level_funding;
        let mut seen = HashSet::new();
        for cs in &self.currency_settings {
            cs.validate(pooled)?;
            if !seen.insert(cs.key()) {
                return Err(invalid(format!("duplicate currency setting {}", cs.key())));
            }
        }

        self.validate_funding()?;
        self.portfolio_settings.buy_side.validate("portfolio buy_side")?;
        self.portfolio_settings.sell_side.validate("portfolio sell_side")?;
        self.portfolio_settings.leverage.validate("portfolio leverage")?;
        self.data_settings.validate()?;
        Ok(())
    }

    fn validate_funding(&self) -> Result<(), ConfigError> {
        let funding = &self.funding_settings;
        match (funding.use_exchange_level_funding, funding.exchange_level_funding.is_empty()) {
            (true, true) => {
                return Err(invalid("exchange level funding enabled without funding items"))
            }
            (false, false) => {
                return Err(invalid("funding items given while exchange level funding is off"))
            }
            (false, true) => return Ok(()),
            (true, false) => {}
        }

        let mut items = HashSet::new();
        for item in &funding.exchange_level_funding {
            if item.initial_funds < 0.0 || item.transfer_fee < 0.0 {
                return Err(invalid(format!(
                    "{}/{}/{}: funds and transfer fee must be non-negative",
                    item.exchange_name, item.asset, item.currency
                )));
            }
            let id = (
                item.exchange_name.to_lowercase(),
                item.asset,
                item.currency.to_uppercase(),
            );
            if !items.insert(id) {
                return Err(invalid(format!(
                    "duplicate funding item {}/{}/{}",
                    item.exchange_name, item.asset, item.currency
                )));
            }
        }

        for cs in &self.currency_settings {
            let key = cs.key();
            if !items.contains(&(key.exchange.clone(), key.asset, key.pair.quote.clone())) {
                return Err(invalid(format!(
                    "{key}: no exchange level funding for quote currency {}",
                    key.pair.quote
                )));
            }
        }
        Ok(())
    }

    /// Settings for `key`, if configured.
    pub fn currency(&self, key: &PairKey) -> Option<&CurrencySettings> {
        self.currency_settings.iter().find(|cs| &cs.key() == key)
    }

    /// Configured pair keys in declaration order.
    pub fn pair_keys(&self) -> Vec<PairKey> {
        self.currency_settings.iter().map(CurrencySettings::key).collect()
    }

    /// Lowercase exchange names in first-seen order.
    pub fn exchanges(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for key in self.pair_keys() {
            if !out.contains(&key.exchange) {
                out.push(key.exchange);
            }
        }
        out
    }

    /// Display name: the nickname, or the strategy name when unset.
    pub fn display_name(&self) -> &str {
        if self.nickname.trim().is_empty() {
            &self.strategy_settings.name
        } else {
            &self.nickname
        }
    }
}
