//! Server settings.
//!
//! Loaded from an optional TOML file, then overridden by `BACKTESTER_*`
//! environment variables. Callers load `.env` with `dotenvy` first.

use backtester_core::data::DataServices;
use backtester_core::domain::{AssetClass, CurrencyPair, PairKey};
use backtester_core::gateway::{GatewayRegistry, ScriptedGateway};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::manager::{ManagerSettings, Services};
use crate::report::{JsonlReportSink, ReportSink};
use crate::telemetry::LogFormat;

pub const ENV_PREFIX: &str = "BACKTESTER_";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
    /// JSONL file receiving a report per finished run.
    pub report_path: Option<PathBuf>,
    /// Base directory for relative CSV paths in strategy configs.
    pub csv_base_dir: Option<PathBuf>,
    /// Base directory for relative `.strat` paths.
    pub strategy_dir: Option<PathBuf>,
    pub log_format: LogFormat,
    /// Scripted exchanges for paper trading live configs.
    pub paper_exchanges: Vec<PaperExchange>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9054)),
            report_path: None,
            csv_base_dir: None,
            strategy_dir: None,
            log_format: LogFormat::Pretty,
            paper_exchanges: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperExchange {
    pub name: String,
    #[serde(default)]
    pub fee_rate: f64,
    #[serde(default)]
    pub markets: Vec<PaperMarket>,
}

/// A market whose price walks `prices` forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMarket {
    pub asset: AssetClass,
    pub base: String,
    pub quote: String,
    pub prices: Vec<f64>,
}

impl ServerSettings {
    /// Read `path` when given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `BACKTESTER_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), SettingsError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        if let Some(value) = var("LISTEN_ADDR") {
            self.listen_addr = value.trim().parse().map_err(|_| SettingsError::InvalidEnv {
                key: format!("{ENV_PREFIX}LISTEN_ADDR"),
                value: value.clone(),
            })?;
        }
        if let Some(value) = var("LOG_FORMAT") {
            self.log_format = value.parse().map_err(|_| SettingsError::InvalidEnv {
                key: format!("{ENV_PREFIX}LOG_FORMAT"),
                value: value.clone(),
            })?;
        }
        if let Some(value) = var("REPORT_PATH") {
            self.report_path = Some(PathBuf::from(value));
        }
        if let Some(value) = var("CSV_BASE_DIR") {
            self.csv_base_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = var("STRATEGY_DIR") {
            self.strategy_dir = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings { strategy_dir: self.strategy_dir.clone() }
    }

    /// Collaborators for the run manager: default strategies, paper
    /// gateways, CSV base dir and the JSONL report sink when configured.
    pub fn services(&self) -> Services {
        let mut gateways = GatewayRegistry::new();
        for exchange in &self.paper_exchanges {
            let mut gateway = ScriptedGateway::new(&exchange.name).with_fee_rate(exchange.fee_rate);
            for market in &exchange.markets {
                let key = PairKey::new(&exchange.name, market.asset, CurrencyPair::new(&market.base, &market.quote));
                gateway = gateway.with_cycling_prices(key, market.prices.clone());
            }
            gateways.register(Arc::new(gateway));
        }

        let report_sink = self
            .report_path
            .as_ref()
            .map(|path| Arc::new(JsonlReportSink::new(path)) as Arc<dyn ReportSink>);

        Services {
            data: DataServices { gateways, candle_store: None, csv_base_dir: self.csv_base_dir.clone() },
            report_sink,
            ..Services::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_listen_on_localhost() {
        let settings = ServerSettings::default();
        assert_eq!(settings.listen_addr.to_string(), "127.0.0.1:9054");
        assert!(settings.report_path.is_none());
    }

    #[test]
    fn parses_toml_with_paper_exchanges() {
        let settings = ServerSettings::from_toml(
            r#"
            listen_addr = "0.0.0.0:8080"
            report_path = "reports/runs.jsonl"
            log_format = "json"

            [[paper_exchanges]]
            name = "binance"
            fee_rate = 0.001

            [[paper_exchanges.markets]]
            asset = "spot"
            base = "BTC"
            quote = "USDT"
            prices = [100.0, 101.0, 99.5]
            "#,
        )
        .unwrap();
        assert_eq!(settings.listen_addr.port(), 8080);
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.paper_exchanges[0].markets[0].prices.len(), 3);

        let services = settings.services();
        assert!(services.data.gateways.contains("binance"));
        assert!(services.report_sink.is_some());
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BACKTESTER_LISTEN_ADDR", "127.0.0.1:7000"),
            ("BACKTESTER_CSV_BASE_DIR", "/data/csv"),
            ("BACKTESTER_REPORT_PATH", ""),
        ]);
        let mut settings = ServerSettings::default();
        settings.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.listen_addr.port(), 7000);
        assert_eq!(settings.csv_base_dir, Some(PathBuf::from("/data/csv")));
        assert!(settings.report_path.is_none());
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut settings = ServerSettings::default();
        let err = settings
            .apply_overrides(|k| (k == "BACKTESTER_LISTEN_ADDR").then(|| "not an address".to_string()))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidEnv { .. }));
    }
}
