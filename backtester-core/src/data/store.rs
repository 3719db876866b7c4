//! Candle storage seam for the database data source.

use super::DataError;
use crate::domain::{PairKey, TimedCandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Candles with `start <= timestamp < end`, oldest first.
    async fn load_candles(
        &self,
        key: &PairKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_secs: u64,
    ) -> Result<Vec<TimedCandle>, DataError>;
}

/// Candles held in memory, keyed by pair and interval.
#[derive(Debug, Clone, Default)]
pub struct MemoryCandleStore {
    series: HashMap<(PairKey, u64), Vec<TimedCandle>>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: PairKey, interval_secs: u64, mut candles: Vec<TimedCandle>) {
        candles.sort_by_key(|c| c.timestamp);
        self.series.insert((key, interval_secs), candles);
    }

    pub fn with(mut self, key: PairKey, interval_secs: u64, candles: Vec<TimedCandle>) -> Self {
        self.insert(key, interval_secs, candles);
        self
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn load_candles(
        &self,
        key: &PairKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_secs: u64,
    ) -> Result<Vec<TimedCandle>, DataError> {
        let series = self
            .series
            .get(&(key.clone(), interval_secs))
            .ok_or_else(|| DataError::Store(format!("no {interval_secs}s series for {key}")))?;
        Ok(series
            .iter()
            .filter(|c| c.timestamp >= start && c.timestamp < end)
            .copied()
            .collect())
    }
}
