//! Backtester Runner: run registry, strategy file loading, the HTTP gateway
//! and run reports.
//!
//! This crate hosts runs built by `backtester-core`:
//! - `.strat` loading (TOML or JSON)
//! - The run manager: create, start, stop, stop-all, list, clear, report
//! - JSONL report sink for finished runs
//! - Server settings with environment overrides
//! - Tracing setup
//! - The axum router exposing `/v1/<methodname>`

pub mod api;
pub mod error;
pub mod loader;
pub mod manager;
pub mod report;
pub mod settings;
pub mod telemetry;

pub use error::RunError;
pub use loader::load_config;
pub use manager::{ManagerSettings, RunManager, RunSummary, Services};
pub use report::{JsonlReportSink, MemoryReportSink, ReportSink, RunReport};
pub use settings::ServerSettings;
pub use telemetry::{init_tracing, LogFormat};
