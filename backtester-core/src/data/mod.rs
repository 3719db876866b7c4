//! Market data sources.
//!
//! Historical sources (exchange API, CSV files, a [`CandleStore`]) are
//! loaded up front into a [`HistoricalData`] queue. Live data is polled by a
//! background task into a [`LiveFeed`]. The engine only sees the
//! [`DataHandler`] trait and pulls one timestamp batch at a time.

pub mod circuit_breaker;
pub mod csv_file;
pub mod historical;
pub mod live;
pub mod store;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use historical::HistoricalData;
pub use live::LiveFeed;
pub use store::{CandleStore, MemoryCandleStore};

use crate::config::{Config, DataSource};
use crate::event::DataEvent;
use crate::gateway::{GatewayError, GatewayRegistry};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("csv error in {path}: {message}")]
    Csv { path: String, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("candle store: {0}")]
    Store(String),

    #[error("no data for {0}")]
    Empty(String),

    #[error("no new data event within {0}s")]
    Timeout(u64),

    #[error("hard stop: live feed circuit breaker tripped after {0} consecutive failures")]
    CircuitBreakerTripped(u32),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Pull-based source of data events.
///
/// Each batch holds every event sharing one timestamp, in pair declaration
/// order. `Ok(None)` means the source is exhausted.
#[async_trait]
pub trait DataHandler: Send {
    async fn next_batch(&mut self) -> Result<Option<Vec<DataEvent>>, DataError>;

    fn is_live(&self) -> bool;
}

/// Collaborators the data layer may need, shared across runs.
#[derive(Clone, Default)]
pub struct DataServices {
    pub gateways: GatewayRegistry,
    pub candle_store: Option<Arc<dyn CandleStore>>,
    /// Base directory for relative CSV paths.
    pub csv_base_dir: Option<PathBuf>,
}

impl std::fmt::Debug for DataServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataServices")
            .field("gateways", &self.gateways)
            .field("candle_store", &self.candle_store.is_some())
            .field("csv_base_dir", &self.csv_base_dir)
            .finish()
    }
}

/// Open the configured data source.
///
/// Historical sources are fully loaded before this returns. A live source
/// starts polling immediately.
pub async fn open(cfg: &Config, services: &DataServices) -> Result<Box<dyn DataHandler>, DataError> {
    let source = cfg
        .data_settings
        .source()
        .map_err(|e| DataError::Unsupported(e.to_string()))?;
    let handler: Box<dyn DataHandler> = match source {
        DataSource::Api(range) => Box::new(historical::load_api(cfg, range, &services.gateways).await?),
        DataSource::Csv(csv) => Box::new(csv_file::load(cfg, &csv.path, services.csv_base_dir.as_deref())?),
        DataSource::Database(range) => {
            let store = services
                .candle_store
                .as_ref()
                .ok_or_else(|| DataError::Unsupported("database data without a candle store".into()))?;
            Box::new(historical::load_store(cfg, range, store.as_ref()).await?)
        }
        DataSource::Live(live) => Box::new(LiveFeed::spawn(cfg, live, &services.gateways)?),
    };
    Ok(handler)
}
