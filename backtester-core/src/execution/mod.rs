//! Execution: turning orders into fills.
//!
//! Historical runs use the deterministic [`ExecutionSimulator`]; live runs
//! route through the [`LiveExecutionAdapter`]. [`Executor`] picks one per run.

pub mod fees;
pub mod live;
pub mod simulator;
pub mod slippage;

pub use fees::FeeSchedule;
pub use live::LiveExecutionAdapter;
pub use simulator::ExecutionSimulator;
pub use slippage::UniformSlippage;

use crate::event::{DataEvent, FillEvent, OrderEvent};
use crate::gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("no usable price for {0}")]
    NoPrice(String),

    #[error("order for unconfigured pair {0}")]
    UnconfiguredPair(String),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),
}

impl ExecutionError {
    /// Fatal errors end the run; the rest are recorded and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::Gateway(_) | ExecutionError::UnconfiguredPair(_))
    }
}

#[derive(Debug, Clone)]
pub enum Executor {
    Simulated(ExecutionSimulator),
    Live(LiveExecutionAdapter),
}

impl Executor {
    pub async fn execute(&self, order: &OrderEvent, data: &DataEvent) -> Result<FillEvent, ExecutionError> {
        match self {
            Executor::Simulated(sim) => sim.simulate(order, data),
            Executor::Live(live) => live.execute(order, data).await,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Executor::Live(_))
    }
}
