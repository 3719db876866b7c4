use super::{check_services, EngineError, RunState};
use crate::config::Config;
use crate::data::{self, DataHandler, DataServices};
use crate::domain::PairKey;
use crate::event::{DataEvent, Direction, OrderEvent, SignalEvent};
use crate::execution::{ExecutionSimulator, Executor, LiveExecutionAdapter};
use crate::portfolio::{NoTrade, Portfolio, PortfolioError, Sizing};
use crate::statistics::StatisticsRecorder;
use crate::strategy::{Strategy, StrategyContext, StrategyRegistry};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CLOSE_ON_EXIT_REASON: &str = "closing position on exit";

/// How the engine finished.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutcome {
    pub state: RunState,
    pub error: Option<String>,
}

impl EngineOutcome {
    fn ok(state: RunState) -> Self {
        Self { state, error: None }
    }

    fn errored(error: impl ToString) -> Self {
        Self { state: RunState::Errored, error: Some(error.to_string()) }
    }
}

/// Shared read access to a run's portfolio and statistics.
#[derive(Debug, Clone)]
pub struct EngineHandles {
    pub portfolio: Arc<RwLock<Portfolio>>,
    pub statistics: Arc<RwLock<StatisticsRecorder>>,
}

enum Strategies {
    /// One instance per pair, in declaration order.
    PerPair(Vec<Box<dyn Strategy>>),
    /// One instance seeing every pair's event at once.
    Simultaneous(Box<dyn Strategy>),
}

enum LoopExit {
    Exhausted,
    Cancelled,
}

/// One run's engine. Built in the Created state, consumed by [`Engine::run`].
pub struct Engine {
    config: Arc<Config>,
    services: DataServices,
    portfolio: Arc<RwLock<Portfolio>>,
    statistics: Arc<RwLock<StatisticsRecorder>>,
    strategies: Strategies,
    executor: Executor,
    index: HashMap<PairKey, usize>,
    latest: Vec<Option<DataEvent>>,
    close_on_exit: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config.display_name())
            .field("live", &self.executor.is_live())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build the portfolio, strategies and executor for `config`.
    ///
    /// Fails when the strategy or one of the services the config needs is
    /// not available. No data is loaded until [`Engine::run`].
    pub fn new(config: Arc<Config>, registry: &StrategyRegistry, services: DataServices) -> Result<Self, EngineError> {
        config.validate().map_err(|e| EngineError::Setup(e.to_string()))?;
        check_services(&config, &services)?;

        let settings = &config.strategy_settings;
        let strategies = if settings.use_simultaneous_signal_processing {
            Strategies::Simultaneous(registry.build(settings)?)
        } else {
            let per_pair = config
                .currency_settings
                .iter()
                .map(|_| registry.build(settings))
                .collect::<Result<Vec<_>, _>>()?;
            Strategies::PerPair(per_pair)
        };

        let live = config.data_settings.live_data.as_ref();
        let executor = if live.is_some() {
            Executor::Live(LiveExecutionAdapter::new(services.gateways.clone()))
        } else {
            Executor::Simulated(ExecutionSimulator::new(&config))
        };

        let index = config.pair_keys().into_iter().enumerate().map(|(i, k)| (k, i)).collect();
        Ok(Self {
            portfolio: Arc::new(RwLock::new(Portfolio::new(&config)?)),
            statistics: Arc::new(RwLock::new(StatisticsRecorder::new(&config))),
            latest: vec![None; config.currency_settings.len()],
            close_on_exit: live.is_some_and(|l| l.close_positions_on_exit),
            strategies,
            executor,
            index,
            services,
            config,
        })
    }

    pub fn handles(&self) -> EngineHandles {
        EngineHandles { portfolio: Arc::clone(&self.portfolio), statistics: Arc::clone(&self.statistics) }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn is_live(&self) -> bool {
        self.executor.is_live()
    }

    /// Load data and drive the loop until the source is exhausted, `cancel`
    /// fires, or a fatal error occurs.
    pub async fn run(mut self, cancel: CancellationToken) -> EngineOutcome {
        let name = self.config.display_name().to_string();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return EngineOutcome::ok(RunState::Stopped),
            opened = data::open(&self.config, &self.services) => opened,
        };
        let mut source = match opened {
            Ok(source) => source,
            Err(e) => {
                warn!(run = %name, error = %e, "data load failed");
                return self.fail(EngineError::Data(e)).await;
            }
        };
        info!(run = %name, live = source.is_live(), "engine started");

        let exit = self.event_loop(source.as_mut(), &cancel).await;
        drop(source);

        let outcome = match exit {
            Ok(LoopExit::Exhausted) => EngineOutcome::ok(RunState::Completed),
            Ok(LoopExit::Cancelled) if self.close_on_exit => match self.close_positions().await {
                Ok(()) => EngineOutcome::ok(RunState::Stopped),
                Err(e) => self.fail(e).await,
            },
            Ok(LoopExit::Cancelled) => EngineOutcome::ok(RunState::Stopped),
            Err(e) => self.fail(e).await,
        };
        let events = self.statistics.read().await.event_count();
        info!(run = %name, state = %outcome.state, events, "engine finished");
        outcome
    }

    async fn fail(&mut self, error: EngineError) -> EngineOutcome {
        warn!(run = %self.config.display_name(), error = %error, "run errored");
        self.statistics.write().await.record_error(Utc::now(), error.to_string());
        EngineOutcome::errored(error)
    }

    async fn event_loop(
        &mut self,
        source: &mut dyn DataHandler,
        cancel: &CancellationToken,
    ) -> Result<LoopExit, EngineError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(LoopExit::Cancelled),
                next = source.next_batch() => next?,
            };
            let Some(batch) = next else {
                return Ok(LoopExit::Exhausted);
            };
            self.process_batch(batch).await?;
        }
    }

    async fn process_batch(&mut self, batch: Vec<DataEvent>) -> Result<(), EngineError> {
        self.observe(&batch).await?;

        for (signal, data) in self.signals(&batch).await? {
            self.handle_signal(signal, &data).await?;
        }

        let portfolio = self.portfolio.read().await;
        let mut stats = self.statistics.write().await;
        for event in &batch {
            stats.record_holding(portfolio.holding(&event.key, event.event_ref())?)?;
        }
        if let Some(last) = batch.last() {
            stats.record_equity(last.timestamp, portfolio.total_value());
        }
        Ok(())
    }

    /// Record the batch, mark to market and liquidate under-water pools.
    async fn observe(&mut self, batch: &[DataEvent]) -> Result<(), EngineError> {
        let mut portfolio = self.portfolio.write().await;
        let mut stats = self.statistics.write().await;
        for event in batch {
            let idx = *self
                .index
                .get(&event.key)
                .ok_or_else(|| PortfolioError::UnconfiguredPair(event.key.to_string()))?;
            stats.record_data(event)?;
            portfolio.update_market(event)?;
            self.latest[idx] = Some(event.clone());
        }
        for (order, fill) in portfolio.check_liquidation() {
            stats.record_order(&order)?;
            stats.record_fill(&fill)?;
        }
        Ok(())
    }

    /// Signals for the batch, each paired with the event it reads.
    async fn signals(&mut self, batch: &[DataEvent]) -> Result<Vec<(SignalEvent, DataEvent)>, EngineError> {
        let portfolio = self.portfolio.read().await;
        let ctx = StrategyContext::new(&portfolio);
        let mut out = Vec::with_capacity(batch.len());
        match &mut self.strategies {
            Strategies::PerPair(list) => {
                for event in batch {
                    let idx = *self
                        .index
                        .get(&event.key)
                        .ok_or_else(|| PortfolioError::UnconfiguredPair(event.key.to_string()))?;
                    match list[idx].on_signal(event, &ctx) {
                        Ok(signal) => out.push((signal, event.clone())),
                        Err(e) => {
                            let e = EngineError::from(e);
                            if e.is_fatal() {
                                return Err(e);
                            }
                            warn!(pair = %event.key, error = %e, "strategy failed for event");
                            self.statistics.write().await.record_error(event.timestamp, e.to_string());
                        }
                    }
                }
            }
            Strategies::Simultaneous(strategy) => {
                // Every pair's latest event, in declaration order. Pairs that
                // did not advance this batch are shown but not traded.
                let universe: Vec<DataEvent> = self.latest.iter().flatten().cloned().collect();
                let signals = strategy.on_simultaneous_signals(&universe, &ctx)?;
                for signal in signals {
                    if !self.index.contains_key(&signal.key) {
                        return Err(PortfolioError::UnconfiguredPair(signal.key.to_string()).into());
                    }
                    match batch.iter().find(|e| e.key == signal.key && e.offset == signal.source.offset) {
                        Some(event) => out.push((signal, event.clone())),
                        None => debug!(pair = %signal.key, "signal for a pair without a new event ignored"),
                    }
                }
            }
        }
        Ok(out)
    }

    async fn handle_signal(&mut self, signal: SignalEvent, data: &DataEvent) -> Result<(), EngineError> {
        self.statistics.write().await.record_signal(&signal)?;

        if let Some(request) = &signal.transfer {
            let result = self.portfolio.write().await.transfer(request, &signal.key, signal.source);
            match result {
                Ok(fill) => self.statistics.write().await.record_fill(&fill)?,
                Err(PortfolioError::Funding(e)) => {
                    debug!(pair = %signal.key, error = %e, "transfer refused");
                    let refused = NoTrade { direction: Direction::TransferredFunds, reason: e.to_string() };
                    self.statistics.write().await.record_no_trade(&signal.key, signal.source, &refused)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let sizing = self.portfolio.write().await.on_signal(&signal, data)?;
        match sizing {
            Sizing::NoTrade(no_trade) => {
                debug!(pair = %signal.key, reason = %no_trade.reason, "no trade");
                self.statistics.write().await.record_no_trade(&signal.key, signal.source, &no_trade)?;
                Ok(())
            }
            Sizing::Order(order) => {
                self.statistics.write().await.record_order(&order)?;
                self.execute(order, data).await
            }
        }
    }

    async fn execute(&mut self, order: OrderEvent, data: &DataEvent) -> Result<(), EngineError> {
        match self.executor.execute(&order, data).await {
            Ok(fill) => {
                self.portfolio.write().await.on_fill(&fill)?;
                self.statistics.write().await.record_fill(&fill)?;
                Ok(())
            }
            Err(e) => {
                self.portfolio.write().await.release(&order)?;
                if e.is_fatal() {
                    return Err(e.into());
                }
                debug!(pair = %order.key, error = %e, "order not executed");
                let no_trade = NoTrade { direction: order.direction.rejected(), reason: e.to_string() };
                self.statistics.write().await.record_no_trade(&order.key, order.source, &no_trade)?;
                Ok(())
            }
        }
    }

    /// Flatten every open position through the executor.
    async fn close_positions(&mut self) -> Result<(), EngineError> {
        let orders = self.portfolio.read().await.closing_orders(CLOSE_ON_EXIT_REASON);
        info!(positions = orders.len(), "closing positions on exit");
        for order in orders {
            let data = self
                .index
                .get(&order.key)
                .and_then(|&i| self.latest[i].clone())
                .ok_or_else(|| EngineError::ClosePositions(format!("no market data for {}", order.key)))?;
            self.statistics.write().await.record_order(&order)?;
            let fill = self
                .executor
                .execute(&order, &data)
                .await
                .map_err(|e| EngineError::ClosePositions(format!("{}: {e}", order.key)))?;
            self.portfolio.write().await.on_fill(&fill)?;
            self.statistics.write().await.record_fill(&fill)?;
            let holding = self.portfolio.read().await.holding(&order.key, data.event_ref())?;
            self.statistics.write().await.record_holding(holding)?;
        }
        Ok(())
    }
}
