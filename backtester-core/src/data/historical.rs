//! Preloaded historical candles, replayed in timestamp order.

use super::store::CandleStore;
use super::{DataError, DataHandler};
use crate::config::{Config, DateRange};
use crate::domain::{PairKey, TimedCandle};
use crate::event::{DataEvent, Observation};
use crate::gateway::GatewayRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::{info, warn};

/// Every pair's candles merged into timestamp batches.
#[derive(Debug, Clone, Default)]
pub struct HistoricalData {
    batches: VecDeque<Vec<DataEvent>>,
    total_events: usize,
}

impl HistoricalData {
    /// Build from one candle series per pair, given in declaration order.
    ///
    /// Each series is sorted, void candles and repeated timestamps are
    /// dropped, and offsets are assigned per pair from 1. Events sharing a
    /// timestamp form one batch, ordered as the pairs were declared.
    pub fn from_series(series: Vec<(PairKey, Vec<TimedCandle>)>, interval_secs: u64) -> Result<Self, DataError> {
        let mut events: Vec<(DateTime<Utc>, usize, DataEvent)> = Vec::new();
        for (decl, (key, mut candles)) in series.into_iter().enumerate() {
            candles.sort_by_key(|c| c.timestamp);
            let before = candles.len();
            candles.retain(|c| !c.candle.is_void());
            candles.dedup_by_key(|c| c.timestamp);
            if candles.len() < before {
                warn!(pair = %key, dropped = before - candles.len(), "dropped void or duplicate candles");
            }
            if candles.is_empty() {
                return Err(DataError::Empty(key.to_string()));
            }
            for (i, c) in candles.into_iter().enumerate() {
                let event = DataEvent {
                    offset: i as u64 + 1,
                    timestamp: c.timestamp,
                    key: key.clone(),
                    interval_secs,
                    observation: Observation::Candle(c.candle),
                };
                events.push((c.timestamp, decl, event));
            }
        }
        events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let total_events = events.len();
        let mut batches: VecDeque<Vec<DataEvent>> = VecDeque::new();
        let mut current: Option<DateTime<Utc>> = None;
        for (ts, _, event) in events {
            match batches.back_mut() {
                Some(batch) if current == Some(ts) => batch.push(event),
                _ => {
                    current = Some(ts);
                    batches.push_back(vec![event]);
                }
            }
        }
        Ok(Self { batches, total_events })
    }

    pub fn total_events(&self) -> usize {
        self.total_events
    }

    pub fn remaining_batches(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl DataHandler for HistoricalData {
    async fn next_batch(&mut self) -> Result<Option<Vec<DataEvent>>, DataError> {
        Ok(self.batches.pop_front())
    }

    fn is_live(&self) -> bool {
        false
    }
}

/// End of a date range as an exclusive bound.
pub fn exclusive_end(range: &DateRange, interval_secs: u64) -> DateTime<Utc> {
    if range.inclusive_end_date {
        range.end_date + Duration::seconds(interval_secs as i64)
    } else {
        range.end_date
    }
}

/// Load candles for every pair from its exchange gateway.
pub async fn load_api(cfg: &Config, range: &DateRange, gateways: &GatewayRegistry) -> Result<HistoricalData, DataError> {
    let interval = cfg.data_settings.interval_secs;
    let end = exclusive_end(range, interval);
    let mut series = Vec::new();
    for key in cfg.pair_keys() {
        let gateway = gateways
            .get(&key.exchange)
            .ok_or_else(|| DataError::Unsupported(format!("no gateway registered for {}", key.exchange)))?;
        let candles = gateway.get_historic_candles(&key, range.start_date, end, interval).await?;
        info!(pair = %key, candles = candles.len(), "loaded candles from exchange");
        series.push((key, candles));
    }
    HistoricalData::from_series(series, interval)
}

/// Load candles for every pair from a candle store.
pub async fn load_store(cfg: &Config, range: &DateRange, store: &dyn CandleStore) -> Result<HistoricalData, DataError> {
    let interval = cfg.data_settings.interval_secs;
    let end = exclusive_end(range, interval);
    let mut series = Vec::new();
    for key in cfg.pair_keys() {
        let candles = store.load_candles(&key, range.start_date, end, interval).await?;
        info!(pair = %key, candles = candles.len(), "loaded candles from store");
        series.push((key, candles));
    }
    HistoricalData::from_series(series, interval)
}
