//! The per-run event log.
//!
//! Events are filed per pair under the offset of the data observation they
//! originated from. Offsets within a pair must strictly increase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::metrics::PerformanceMetrics;
use super::StatisticsError;
use crate::config::Config;
use crate::domain::PairKey;
use crate::event::{DataEvent, Direction, EventRef, FillEvent, OrderEvent, SignalEvent};
use crate::portfolio::{Holding, NoTrade};

/// Everything that happened for one pair at one offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
    pub data: DataEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<OrderEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fills: Vec<FillEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_trades: Vec<NoTrade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holding: Option<Holding>,
}

impl EventRecord {
    fn new(data: &DataEvent) -> Self {
        Self {
            offset: data.offset,
            timestamp: data.timestamp,
            data: data.clone(),
            signal: None,
            orders: Vec::new(),
            fills: Vec::new(),
            no_trades: Vec::new(),
            holding: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Per-pair roll-up included in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSummary {
    pub key: PairKey,
    pub events: usize,
    pub first_price: f64,
    pub last_price: f64,
    /// Percentage move of the close price over the run.
    pub market_movement_percent: f64,
    pub buy_fills: usize,
    pub sell_fills: usize,
    pub no_trades: usize,
    pub total_fees: f64,
    /// Σ price × amount over trade fills.
    pub traded_notional: f64,
    pub final_holding: Option<Holding>,
    pub records: Vec<EventRecord>,
}

/// A serialisable, deterministic copy of a recorder's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub pairs: Vec<PairSummary>,
    pub transfers: Vec<FillEvent>,
    pub errors: Vec<RecordedError>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone)]
struct PairRecords {
    key: PairKey,
    records: Vec<EventRecord>,
}

impl PairRecords {
    fn find_mut(&mut self, offset: u64) -> Option<&mut EventRecord> {
        self.records
            .binary_search_by_key(&offset, |r| r.offset)
            .ok()
            .map(|i| &mut self.records[i])
    }

    fn summary(&self) -> PairSummary {
        let first_price = self.records.first().map(|r| r.data.close_price()).unwrap_or_default();
        let last_price = self.records.last().map(|r| r.data.close_price()).unwrap_or_default();
        let market_movement_percent = if first_price > 0.0 {
            (last_price - first_price) / first_price * 100.0
        } else {
            0.0
        };
        let trade_fills = || self.records.iter().flat_map(|r| &r.fills).filter(|f| f.direction.is_trade());
        PairSummary {
            key: self.key.clone(),
            events: self.records.len(),
            first_price,
            last_price,
            market_movement_percent,
            buy_fills: trade_fills().filter(|f| f.direction == Direction::Buy).count(),
            sell_fills: trade_fills().filter(|f| f.direction == Direction::Sell).count(),
            no_trades: self.records.iter().map(|r| r.no_trades.len()).sum(),
            total_fees: trade_fills().map(|f| f.fee).sum(),
            traded_notional: trade_fills().map(|f| f.price * f.amount).sum(),
            final_holding: self.records.iter().rev().find_map(|r| r.holding.clone()),
            records: self.records.clone(),
        }
    }
}

/// Collects every event of one run.
#[derive(Debug, Clone)]
pub struct StatisticsRecorder {
    pairs: Vec<PairRecords>,
    index: HashMap<PairKey, usize>,
    transfers: Vec<FillEvent>,
    errors: Vec<RecordedError>,
    equity: Vec<EquityPoint>,
    interval_secs: u64,
    risk_free_rate: f64,
}

impl StatisticsRecorder {
    pub fn new(cfg: &Config) -> Self {
        let pairs: Vec<PairRecords> = cfg
            .pair_keys()
            .into_iter()
            .map(|key| PairRecords { key, records: Vec::new() })
            .collect();
        let index = pairs.iter().enumerate().map(|(i, p)| (p.key.clone(), i)).collect();
        Self {
            pairs,
            index,
            transfers: Vec::new(),
            errors: Vec::new(),
            equity: Vec::new(),
            interval_secs: cfg.data_settings.interval_secs,
            risk_free_rate: cfg.statistic_settings.risk_free_rate,
        }
    }

    fn pair_mut(&mut self, key: &PairKey) -> Result<&mut PairRecords, StatisticsError> {
        let idx = *self
            .index
            .get(key)
            .ok_or_else(|| StatisticsError::UnknownPair(key.to_string()))?;
        Ok(&mut self.pairs[idx])
    }

    fn record_mut(&mut self, key: &PairKey, source: EventRef) -> Result<&mut EventRecord, StatisticsError> {
        self.pair_mut(key)?
            .find_mut(source.offset)
            .ok_or_else(|| StatisticsError::NoRecord { key: key.to_string(), offset: source.offset })
    }

    /// Open a record for a new observation.
    pub fn record_data(&mut self, data: &DataEvent) -> Result<(), StatisticsError> {
        let pair = self.pair_mut(&data.key)?;
        if let Some(last) = pair.records.last() {
            if data.offset <= last.offset {
                return Err(StatisticsError::AlreadyProcessed { key: data.key.to_string(), offset: data.offset });
            }
        }
        pair.records.push(EventRecord::new(data));
        Ok(())
    }

    pub fn record_signal(&mut self, signal: &SignalEvent) -> Result<(), StatisticsError> {
        self.record_mut(&signal.key, signal.source)?.signal = Some(signal.clone());
        Ok(())
    }

    pub fn record_order(&mut self, order: &OrderEvent) -> Result<(), StatisticsError> {
        self.record_mut(&order.key, order.source)?.orders.push(order.clone());
        Ok(())
    }

    /// Transfers are also kept in a run-wide list.
    pub fn record_fill(&mut self, fill: &FillEvent) -> Result<(), StatisticsError> {
        self.record_mut(&fill.key, fill.source)?.fills.push(fill.clone());
        if fill.direction == Direction::TransferredFunds {
            self.transfers.push(fill.clone());
        }
        Ok(())
    }

    pub fn record_no_trade(&mut self, key: &PairKey, source: EventRef, no_trade: &NoTrade) -> Result<(), StatisticsError> {
        self.record_mut(key, source)?.no_trades.push(no_trade.clone());
        Ok(())
    }

    pub fn record_holding(&mut self, holding: Holding) -> Result<(), StatisticsError> {
        let source = EventRef { offset: holding.offset, timestamp: holding.timestamp };
        let key = holding.key.clone();
        self.record_mut(&key, source)?.holding = Some(holding);
        Ok(())
    }

    /// Append a total-value sample; a repeated timestamp replaces the last one.
    pub fn record_equity(&mut self, timestamp: DateTime<Utc>, total_value: f64) {
        match self.equity.last_mut() {
            Some(last) if last.timestamp == timestamp => last.total_value = total_value,
            _ => self.equity.push(EquityPoint { timestamp, total_value }),
        }
    }

    pub fn record_error(&mut self, timestamp: DateTime<Utc>, message: impl Into<String>) {
        self.errors.push(RecordedError { timestamp, message: message.into() });
    }

    pub fn event_count(&self) -> usize {
        self.pairs.iter().map(|p| p.records.len()).sum()
    }

    pub fn fill_count(&self) -> usize {
        self.pairs
            .iter()
            .flat_map(|p| &p.records)
            .flat_map(|r| &r.fills)
            .filter(|f| f.direction.is_trade())
            .count()
    }

    pub fn latest_record(&self, key: &PairKey) -> Option<&EventRecord> {
        self.index.get(key).and_then(|&i| self.pairs[i].records.last())
    }

    pub fn errors(&self) -> &[RecordedError] {
        &self.errors
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let pairs: Vec<PairSummary> = self.pairs.iter().map(PairRecords::summary).collect();
        let curve: Vec<f64> = self.equity.iter().map(|p| p.total_value).collect();
        let mut metrics = PerformanceMetrics::compute(&curve, self.interval_secs, self.risk_free_rate);
        metrics.fill_count = pairs.iter().map(|p| p.buy_fills + p.sell_fills).sum();
        metrics.total_fees = pairs.iter().map(|p| p.total_fees).sum();
        metrics.realized_pnl = pairs
            .iter()
            .filter_map(|p| p.final_holding.as_ref())
            .map(|h| h.position.realized_pnl)
            .sum();
        StatisticsSnapshot {
            pairs,
            transfers: self.transfers.clone(),
            errors: self.errors.clone(),
            equity_curve: self.equity.clone(),
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::spot_config;
    use crate::portfolio::tests::candle_event;
    use crate::portfolio::Portfolio;

    #[test]
    fn offsets_must_increase() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut rec = StatisticsRecorder::new(&cfg);
        rec.record_data(&candle_event(&key, 1, 100.0)).unwrap();
        rec.record_data(&candle_event(&key, 2, 101.0)).unwrap();
        let err = rec.record_data(&candle_event(&key, 2, 101.0)).unwrap_err();
        assert!(matches!(err, StatisticsError::AlreadyProcessed { offset: 2, .. }));
        assert_eq!(rec.event_count(), 2);
    }

    #[test]
    fn unknown_pair_is_rejected() {
        let cfg = spot_config();
        let mut rec = StatisticsRecorder::new(&cfg);
        let other = PairKey::new("kraken", crate::domain::AssetClass::Spot, crate::domain::CurrencyPair::new("ETH", "USD"));
        assert!(matches!(
            rec.record_data(&candle_event(&other, 1, 1.0)),
            Err(StatisticsError::UnknownPair(_))
        ));
    }

    #[test]
    fn events_are_filed_under_their_source_offset() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut rec = StatisticsRecorder::new(&cfg);
        let d1 = candle_event(&key, 1, 100.0);
        let d2 = candle_event(&key, 2, 110.0);
        rec.record_data(&d1).unwrap();
        rec.record_data(&d2).unwrap();

        let signal = SignalEvent::new(&d1, Direction::Buy);
        rec.record_signal(&signal).unwrap();
        rec.record_no_trade(&key, d1.event_ref(), &NoTrade { direction: Direction::CouldNotBuy, reason: "x".into() })
            .unwrap();

        let snap = rec.snapshot();
        let records = &snap.pairs[0].records;
        assert_eq!(records[0].signal.as_ref(), Some(&signal));
        assert_eq!(records[0].no_trades.len(), 1);
        assert!(records[1].signal.is_none());
        assert!((snap.pairs[0].market_movement_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn equity_samples_collapse_per_timestamp() {
        let cfg = spot_config();
        let mut rec = StatisticsRecorder::new(&cfg);
        let t = chrono::Utc::now();
        rec.record_equity(t, 1.0);
        rec.record_equity(t, 2.0);
        rec.record_equity(t + chrono::Duration::seconds(1), 3.0);
        let snap = rec.snapshot();
        assert_eq!(snap.equity_curve.len(), 2);
        assert_eq!(snap.equity_curve[0].total_value, 2.0);
        assert_eq!(snap.metrics.final_value, 3.0);
    }

    #[test]
    fn holdings_feed_summary_and_metrics() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut rec = StatisticsRecorder::new(&cfg);
        let mut portfolio = Portfolio::new(&cfg).unwrap();
        let data = candle_event(&key, 1, 100.0);
        portfolio.update_market(&data).unwrap();
        rec.record_data(&data).unwrap();
        rec.record_holding(portfolio.holding(&key, data.event_ref()).unwrap()).unwrap();

        let snap = rec.snapshot();
        let holding = snap.pairs[0].final_holding.as_ref().unwrap();
        assert_eq!(holding.offset, 1);
        assert_eq!(snap.metrics.realized_pnl, 0.0);
    }

    #[test]
    fn holding_replaces_the_record_at_its_offset() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut rec = StatisticsRecorder::new(&cfg);
        let mut portfolio = Portfolio::new(&cfg).unwrap();
        let data = candle_event(&key, 1, 100.0);
        portfolio.update_market(&data).unwrap();
        rec.record_data(&data).unwrap();

        let first = portfolio.holding(&key, data.event_ref()).unwrap();
        rec.record_holding(first).unwrap();
        portfolio.update_market(&candle_event(&key, 1, 120.0)).unwrap();
        let second = portfolio.holding(&key, data.event_ref()).unwrap();
        rec.record_holding(second.clone()).unwrap();

        assert_eq!(rec.latest_record(&key).unwrap().holding.as_ref(), Some(&second));

        // No data event at offset 2 yet.
        let later = portfolio.holding(&key, candle_event(&key, 2, 120.0).event_ref()).unwrap();
        assert!(matches!(rec.record_holding(later), Err(StatisticsError::NoRecord { offset: 2, .. })));
    }

    #[test]
    fn snapshot_serialisation_is_stable() {
        let cfg = spot_config();
        let key = cfg.currency_settings[0].key();
        let mut rec = StatisticsRecorder::new(&cfg);
        rec.record_data(&candle_event(&key, 1, 100.0)).unwrap();
        let a = serde_json::to_vec(&rec.snapshot()).unwrap();
        let b = serde_json::to_vec(&rec.clone().snapshot()).unwrap();
        assert_eq!(a, b);
    }
}
