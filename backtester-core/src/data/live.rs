//! Live market data, polled from exchange gateways.
//!
//! A background task polls every pair each `data_check_interval`, either
//! the ticker (trade data) or the latest candle. Observations are only
//! emitted when a pair's timestamp advances. One poll round becomes one
//! batch on a bounded channel. Failed requests count against a
//! [`CircuitBreaker`]; tripping it ends the feed with an error.

use super::circuit_breaker::CircuitBreaker;
use super::{DataError, DataHandler};
use crate::config::{Config, DataType, LiveData};
use crate::domain::PairKey;
use crate::event::{DataEvent, Observation};
use crate::gateway::{ExchangeGateway, GatewayError, GatewayRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

const FEED_CAPACITY: usize = 64;

type FeedItem = Result<Vec<DataEvent>, DataError>;

/// Receiving end of the live poller. Dropping it stops the poller.
pub struct LiveFeed {
    rx: mpsc::Receiver<FeedItem>,
    timeout: Duration,
    _stop: DropGuard,
}

impl std::fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed").field("timeout", &self.timeout).finish()
    }
}

impl LiveFeed {
    /// Resolve a gateway for every pair and start polling.
    pub fn spawn(cfg: &Config, live: &LiveData, gateways: &GatewayRegistry) -> Result<Self, DataError> {
        let pairs = cfg
            .pair_keys()
            .into_iter()
            .map(|key| {
                let gateway = gateways
                    .get(&key.exchange)
                    .ok_or_else(|| DataError::Unsupported(format!("no gateway registered for {}", key.exchange)))?;
                Ok((key, gateway))
            })
            .collect::<Result<Vec<_>, DataError>>()?;

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let stop = CancellationToken::new();
        let poller = Poller {
            last_seen: vec![None; pairs.len()],
            offsets: vec![0; pairs.len()],
            pairs,
            data_type: cfg.data_settings.data_type,
            interval_secs: cfg.data_settings.interval_secs,
            check_interval: Duration::from_millis(live.data_check_interval_ms.max(1)),
            breaker: CircuitBreaker::new(live.max_consecutive_failures),
            tx,
        };
        tokio::spawn(poller.run(stop.clone()));

        Ok(Self {
            rx,
            timeout: Duration::from_secs(live.new_event_timeout_secs),
            _stop: stop.drop_guard(),
        })
    }
}

#[async_trait]
impl DataHandler for LiveFeed {
    async fn next_batch(&mut self) -> Result<Option<Vec<DataEvent>>, DataError> {
        match tokio::time::timeout(self.timeout, self.rx.recv()).await {
            Err(_) => Err(DataError::Timeout(self.timeout.as_secs())),
            Ok(None) => Ok(None),
            Ok(Some(item)) => item.map(Some),
        }
    }

    fn is_live(&self) -> bool {
        true
    }
}

struct Poller {
    pairs: Vec<(PairKey, Arc<dyn ExchangeGateway>)>,
    data_type: DataType,
    interval_secs: u64,
    check_interval: Duration,
    breaker: CircuitBreaker,
    last_seen: Vec<Option<DateTime<Utc>>>,
    offsets: Vec<u64>,
    tx: mpsc::Sender<FeedItem>,
}

impl Poller {
    async fn run(mut self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let item = match self.poll_once().await {
                Ok(batch) if batch.is_empty() => continue,
                Ok(batch) => Ok(batch),
                Err(e) => Err(e),
            };
            let fatal = item.is_err();
            if self.tx.send(item).await.is_err() || fatal {
                return;
            }
        }
    }

    async fn poll_once(&mut self) -> Result<Vec<DataEvent>, DataError> {
        let mut batch = Vec::new();
        for (i, (key, gateway)) in self.pairs.iter().enumerate() {
            match observe(gateway.as_ref(), key, self.data_type, self.interval_secs).await {
                Ok(Some((timestamp, observation))) => {
                    self.breaker.record_success();
                    if self.last_seen[i].is_some_and(|seen| timestamp <= seen) {
                        continue;
                    }
                    self.last_seen[i] = Some(timestamp);
                    self.offsets[i] += 1;
                    batch.push(DataEvent {
                        offset: self.offsets[i],
                        timestamp,
                        key: key.clone(),
                        interval_secs: self.interval_secs,
                        observation,
                    });
                }
                Ok(None) => self.breaker.record_success(),
                Err(e) => {
                    warn!(pair = %key, error = %e, failures = self.breaker.consecutive_failures() + 1, "live data request failed");
                    if self.breaker.record_failure() {
                        return Err(DataError::CircuitBreakerTripped(self.breaker.consecutive_failures()));
                    }
                }
            }
        }
        if !batch.is_empty() {
            debug!(events = batch.len(), "live batch");
        }
        Ok(batch)
    }
}

async fn observe(
    gateway: &dyn ExchangeGateway,
    key: &PairKey,
    data_type: DataType,
    interval_secs: u64,
) -> Result<Option<(DateTime<Utc>, Observation)>, GatewayError> {
    match data_type {
        DataType::Trade => {
            let ticker = gateway.fetch_ticker(key).await?;
            Ok(Some((ticker.timestamp, Observation::Tick { price: ticker.last, volume: ticker.volume })))
        }
        DataType::Candle => {
            let end = Utc::now();
            let start = end - ChronoDuration::seconds(2 * interval_secs as i64);
            let candles = gateway.get_historic_candles(key, start, end, interval_secs).await?;
            Ok(candles.last().map(|c| (c.timestamp, Observation::Candle(c.candle))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::spot_config;
    use crate::gateway::ScriptedGateway;

    fn live_config(data_type: DataType) -> (Config, LiveData) {
        let mut cfg = spot_config();
        let live = LiveData {
            new_event_timeout_secs: 1,
            data_check_interval_ms: 5,
            close_positions_on_exit: false,
            max_consecutive_failures: 2,
        };
        cfg.data_settings.csv_data = None;
        cfg.data_settings.live_data = Some(live.clone());
        cfg.data_settings.data_type = data_type;
        (cfg, live)
    }

    #[tokio::test]
    async fn ticks_arrive_with_increasing_offsets() {
        let (cfg, live) = live_config(DataType::Trade);
        let key = cfg.currency_settings[0].key();
        let gw = Arc::new(ScriptedGateway::new("binance").with_cycling_prices(key.clone(), vec![1.0, 2.0, 3.0]));
        let mut feed = LiveFeed::spawn(&cfg, &live, &GatewayRegistry::new().with(gw)).unwrap();

        let mut offsets = Vec::new();
        for _ in 0..3 {
            let batch = feed.next_batch().await.unwrap().unwrap();
            assert!(matches!(batch[0].observation, Observation::Tick { .. }));
            offsets.push(batch[0].offset);
        }
        assert_eq!(offsets, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn candles_are_polled_for_candle_data() {
        let (cfg, live) = live_config(DataType::Candle);
        let key = cfg.currency_settings[0].key();
        let gw = Arc::new(ScriptedGateway::new("binance").with_cycling_prices(key, vec![5.0]));
        let mut feed = LiveFeed::spawn(&cfg, &live, &GatewayRegistry::new().with(gw)).unwrap();
        let batch = feed.next_batch().await.unwrap().unwrap();
        assert_eq!(batch[0].close_price(), 5.0);
        assert!(batch[0].candle().is_some());
    }

    #[tokio::test]
    async fn stalled_feed_times_out() {
        let (cfg, live) = live_config(DataType::Trade);
        let key = cfg.currency_settings[0].key();
        let gw = Arc::new(ScriptedGateway::new("binance").with_prices(key, vec![1.0]));
        let mut feed = LiveFeed::spawn(&cfg, &live, &GatewayRegistry::new().with(gw)).unwrap();
        assert!(feed.next_batch().await.unwrap().is_some());
        assert!(matches!(feed.next_batch().await, Err(DataError::Timeout(1))));
    }

    #[tokio::test]
    async fn repeated_failures_trip_the_breaker() {
        let (cfg, live) = live_config(DataType::Trade);
        let key = cfg.currency_settings[0].key();
        let gw = Arc::new(ScriptedGateway::new("binance").with_cycling_prices(key, vec![1.0]));
        gw.set_market_data_down(true);
        let mut feed = LiveFeed::spawn(&cfg, &live, &GatewayRegistry::new().with(gw)).unwrap();
        assert!(matches!(feed.next_batch().await, Err(DataError::CircuitBreakerTripped(2))));
        assert!(feed.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_gateway_is_rejected_up_front() {
        let (cfg, live) = live_config(DataType::Trade);
        assert!(matches!(
            LiveFeed::spawn(&cfg, &live, &GatewayRegistry::new()),
            Err(DataError::Unsupported(_))
        ));
    }
}
