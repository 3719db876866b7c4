//! CSV candle files.
//!
//! Format: a header row `timestamp,open,high,low,close,volume`, with the
//! timestamp in RFC 3339 or unix seconds. A run with one pair may point at a
//! single file. Otherwise the path is a directory holding one
//! `{exchange}_{asset}_{BASE-QUOTE}.csv` per pair.

use super::{DataError, HistoricalData};
use crate::config::Config;
use crate::domain::{Candle, PairKey, TimedCandle};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// File name expected for `key` inside a CSV directory.
pub fn file_name(key: &PairKey) -> String {
    format!("{}_{}_{}.csv", key.exchange, key.asset, key.pair)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}

/// Read every candle in one file, in file order.
pub fn read_candles(path: &Path) -> Result<Vec<TimedCandle>, DataError> {
    let csv_err = |message: String| DataError::Csv { path: path.display().to_string(), message };
    if !path.is_file() {
        return Err(DataError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("csv file {} not found", path.display()),
        )));
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_err(e.to_string()))?;

    let mut out = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|e| csv_err(e.to_string()))?;
        let timestamp = parse_timestamp(&row.timestamp)
            .ok_or_else(|| csv_err(format!("row {}: bad timestamp {:?}", line + 2, row.timestamp)))?;
        out.push(TimedCandle {
            timestamp,
            candle: Candle { open: row.open, high: row.high, low: row.low, close: row.close, volume: row.volume },
        });
    }
    Ok(out)
}

fn resolve(path: &Path, base_dir: Option<&Path>) -> PathBuf {
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

/// Load every configured pair from `path`.
pub fn load(cfg: &Config, path: &Path, base_dir: Option<&Path>) -> Result<HistoricalData, DataError> {
    let path = resolve(path, base_dir);
    let keys = cfg.pair_keys();
    let mut series = Vec::with_capacity(keys.len());

    if path.is_dir() {
        for key in keys {
            let file = path.join(file_name(&key));
            let candles = read_candles(&file)?;
            info!(pair = %key, file = %file.display(), candles = candles.len(), "loaded csv candles");
            series.push((key, candles));
        }
    } else {
        let [key] = keys.as_slice() else {
            return Err(DataError::Unsupported(format!(
                "{} pairs configured; point csv_data.path at a directory",
                keys.len()
            )));
        };
        let candles = read_candles(&path)?;
        info!(pair = %key, file = %path.display(), candles = candles.len(), "loaded csv candles");
        series.push((key.clone(), candles));
    }
    HistoricalData::from_series(series, cfg.data_settings.interval_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::spot_config;
    use crate::data::DataHandler;
    use std::fs;

    const CSV: &str = "timestamp,open,high,low,close,volume\n\
        2024-01-01T00:00:00Z,100,110,90,105,1000\n\
        1704153600,105,120,100,115,2000\n";

    #[test]
    fn timestamps_accept_rfc3339_and_unix_seconds() {
        let a = parse_timestamp("2024-01-02T00:00:00Z").unwrap();
        let b = parse_timestamp("1704153600").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn reads_candles_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btc.csv");
        fs::write(&path, CSV).unwrap();
        let candles = read_candles(&path).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].candle.close, 115.0);
        assert_eq!(candles[1].candle.volume, 2000.0);
    }

    #[test]
    fn bad_row_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "timestamp,open,high,low,close,volume\nnope,1,1,1,1,1\n").unwrap();
        match read_candles(&path) {
            Err(DataError::Csv { message, .. }) => assert!(message.contains("row 2")),
            other => panic!("expected csv error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_candles(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, DataError::Io(_)));
    }

    #[tokio::test]
    async fn relative_path_resolves_against_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("candles.csv"), CSV).unwrap();
        let cfg = spot_config();
        let mut data = load(&cfg, Path::new("candles.csv"), Some(dir.path())).unwrap();
        assert_eq!(data.total_events(), 2);
        let batch = data.next_batch().await.unwrap().unwrap();
        assert_eq!(batch[0].offset, 1);
    }

    #[test]
    fn directory_holds_one_file_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = spot_config();
        let mut eth = cfg.currency_settings[0].clone();
        eth.base = "ETH".into();
        cfg.currency_settings.push(eth);
        for key in cfg.pair_keys() {
            fs::write(dir.path().join(file_name(&key)), CSV).unwrap();
        }
        assert_eq!(file_name(&cfg.pair_keys()[0]), "binance_spot_BTC-USDT.csv");
        let data = load(&cfg, dir.path(), None).unwrap();
        assert_eq!(data.total_events(), 4);
        assert_eq!(data.remaining_batches(), 2);
    }

    #[test]
    fn single_file_needs_single_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candles.csv");
        fs::write(&path, CSV).unwrap();
        let mut cfg = spot_config();
        let mut eth = cfg.currency_settings[0].clone();
        eth.base = "ETH".into();
        cfg.currency_settings.push(eth);
        assert!(matches!(load(&cfg, &path, None), Err(DataError::Unsupported(_))));
    }
}
