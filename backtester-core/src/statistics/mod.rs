//! Statistics: the run's event log and the metrics derived from it.

pub mod metrics;
pub mod recorder;

pub use metrics::PerformanceMetrics;
pub use recorder::{EquityPoint, EventRecord, PairSummary, RecordedError, StatisticsRecorder, StatisticsSnapshot};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatisticsError {
    #[error("offset {offset} for {key} already processed")]
    AlreadyProcessed { key: String, offset: u64 },

    #[error("no record for {key} at offset {offset}")]
    NoRecord { key: String, offset: u64 },

    #[error("pair {0} is not tracked")]
    UnknownPair(String),
}
