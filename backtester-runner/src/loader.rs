//! `.strat` file loading.
//!
//! A strategy file is TOML when its extension is `.toml` and JSON otherwise.
//! When the preferred format fails to parse, the other is tried before the
//! first error is reported.

use backtester_core::{Config, ConfigError};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

fn preferred_format(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
        _ => Format::Json,
    }
}

fn parse_as(content: &str, format: Format) -> Result<Config, ConfigError> {
    match format {
        Format::Toml => toml::from_str(content).map_err(|e| ConfigError::Toml(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(ConfigError::from),
    }
}

/// Parse a strategy config from text, preferring `format` hints from `path`.
pub fn parse_config(content: &str, path: &Path) -> Result<Config, ConfigError> {
    let first = preferred_format(path);
    let second = match first {
        Format::Toml => Format::Json,
        Format::Json => Format::Toml,
    };
    match parse_as(content, first) {
        Ok(cfg) => Ok(cfg),
        Err(err) => parse_as(content, second).map_err(|_| err),
    }
}

/// Read, parse and structurally validate a `.strat` file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let cfg = parse_config(&content, path)?;
    cfg.validate()?;
    tracing::debug!(path = %path.display(), strategy = %cfg.strategy_settings.name, "loaded strategy config");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const JSON: &str = r#"{
        "nickname": "dca",
        "strategy_settings": {"name": "dollarcostaverage"},
        "currency_settings": [{
            "exchange_name": "binance", "asset": "spot", "base": "BTC", "quote": "USDT",
            "spot_details": {"initial_base_funds": 0.0, "initial_quote_funds": 1000.0}
        }],
        "data_settings": {"interval_secs": 86400, "csv_data": {"path": "btc.csv"}}
    }"#;

    const TOML: &str = r#"
        nickname = "dca"

        [strategy_settings]
        name = "dollarcostaverage"

        [[currency_settings]]
        exchange_name = "binance"
        asset = "spot"
        base = "BTC"
        quote = "USDT"

        [currency_settings.spot_details]
        initial_base_funds = 0.0
        initial_quote_funds = 1000.0

        [data_settings]
        interval_secs = 86400

        [data_settings.csv_data]
        path = "btc.csv"
    "#;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_json_strat() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&write(&dir, "dca.strat", JSON)).unwrap();
        assert_eq!(cfg.display_name(), "dca");
        assert_eq!(cfg.currency_settings.len(), 1);
    }

    #[test]
    fn loads_toml_strat() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&write(&dir, "dca.toml", TOML)).unwrap();
        assert_eq!(cfg.strategy_settings.name, "dollarcostaverage");
    }

    #[test]
    fn falls_back_to_the_other_format() {
        let dir = tempfile::tempdir().unwrap();
        let from_strat = load_config(&write(&dir, "toml-inside.strat", TOML)).unwrap();
        let from_toml = load_config(&write(&dir, "json-inside.toml", JSON)).unwrap();
        assert_eq!(from_strat, from_toml);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_config(Path::new("/definitely/not/here.strat")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn garbage_reports_the_preferred_parser_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&write(&dir, "bad.strat", "{ not json")).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
        let err = load_config(&write(&dir, "bad.toml", "= nope")).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = JSON.replace(
            r#"[{
            "exchange_name": "binance", "asset": "spot", "base": "BTC", "quote": "USDT",
            "spot_details": {"initial_base_funds": 0.0, "initial_quote_funds": 1000.0}
        }]"#,
            "[]",
        );
        let err = load_config(&write(&dir, "empty.strat", &empty)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
