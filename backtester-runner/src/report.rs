//! Run reports and where they go when a run ends.
//!
//! A [`RunReport`] bundles a run's summary, its statistics snapshot and the
//! final holding of every pair. The manager hands one to the configured
//! [`ReportSink`] on each terminal transition.
//!
//! [`JsonlReportSink`] appends one JSON object per line:
//! - Append-only (safe for concurrent runs finishing together)
//! - Streamable (each line is a self-contained report)
//! - Human-readable with `jq`

use backtester_core::portfolio::Holding;
use backtester_core::StatisticsSnapshot;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::manager::RunSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    /// BLAKE3 fingerprint of the run's config, hex encoded.
    pub fingerprint: String,
    /// Portfolio value across every pair when the report was taken.
    pub total_value: f64,
    pub statistics: StatisticsSnapshot,
    pub final_holdings: Vec<Holding>,
}

/// Receives the report of every run that reaches a terminal state.
pub trait ReportSink: Send + Sync {
    fn publish(&self, report: &RunReport) -> io::Result<()>;
}

/// Appends reports to a JSONL file.
#[derive(Debug)]
pub struct JsonlReportSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every report in the file. Malformed lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<RunReport>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut reports = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(report) = serde_json::from_str::<RunReport>(&line) {
                reports.push(report);
            }
        }
        Ok(reports)
    }
}

impl ReportSink for JsonlReportSink {
    fn publish(&self, report: &RunReport) -> io::Result<()> {
        let json = serde_json::to_string(report).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let _guard = self.write_lock.lock().map_err(|_| io::Error::other("report sink lock poisoned"))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()
    }
}

/// Keeps reports in memory. Used by tests and the local `run` command.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    reports: Mutex<Vec<RunReport>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ReportSink for MemoryReportSink {
    fn publish(&self, report: &RunReport) -> io::Result<()> {
        self.reports
            .lock()
            .map_err(|_| io::Error::other("report sink lock poisoned"))?
            .push(report.clone());
        Ok(())
    }
}
