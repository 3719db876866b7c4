//! Run manager errors and their stable reason codes.

use backtester_core::domain::RunId;
use backtester_core::{ConfigError, EngineError, RunState};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{0}")]
    ConfigInvalid(String),

    #[error("strategy file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("run {0} not found")]
    NotFound(RunId),

    #[error("run {0} is already running")]
    AlreadyRunning(RunId),

    #[error("run {0} has already run")]
    AlreadyRan(RunId),

    #[error("run {id} is not running (state {state})")]
    NotRunning { id: RunId, state: RunState },

    #[error("run {0} is running and cannot be cleared")]
    CannotClearRunning(RunId),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RunError {
    /// Stable SCREAMING_SNAKE_CASE reason, safe to match on in clients.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::ConfigInvalid(_) => "CONFIG_INVALID",
            RunError::FileNotFound(_) => "FILE_NOT_FOUND",
            RunError::NotFound(_) => "NOT_FOUND",
            RunError::AlreadyRunning(_) => "ALREADY_RUNNING",
            RunError::AlreadyRan(_) => "ALREADY_RAN",
            RunError::NotRunning { .. } => "NOT_RUNNING",
            RunError::CannotClearRunning(_) => "CANNOT_CLEAR_RUNNING",
            RunError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status code for the gateway.
    pub fn http_status(&self) -> u16 {
        match self {
            RunError::ConfigInvalid(_) => 400,
            RunError::FileNotFound(_) | RunError::NotFound(_) => 404,
            RunError::AlreadyRunning(_)
            | RunError::AlreadyRan(_)
            | RunError::NotRunning { .. }
            | RunError::CannotClearRunning(_) => 409,
            RunError::Internal(_) => 500,
        }
    }
}

impl From<ConfigError> for RunError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::FileNotFound(path) => RunError::FileNotFound(path),
            ConfigError::Io(e) => RunError::Internal(e.to_string()),
            other => RunError::ConfigInvalid(other.to_string()),
        }
    }
}

/// Engine construction only fails on configuration the collaborators
/// cannot serve, so every setup failure reads as an invalid config.
impl From<EngineError> for RunError {
    fn from(err: EngineError) -> Self {
        RunError::ConfigInvalid(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let id = RunId::new();
        let cases = [
            (RunError::ConfigInvalid("x".into()), "CONFIG_INVALID", 400),
            (RunError::FileNotFound("a.strat".into()), "FILE_NOT_FOUND", 404),
            (RunError::NotFound(id), "NOT_FOUND", 404),
            (RunError::AlreadyRunning(id), "ALREADY_RUNNING", 409),
            (RunError::AlreadyRan(id), "ALREADY_RAN", 409),
            (RunError::NotRunning { id, state: RunState::Created }, "NOT_RUNNING", 409),
            (RunError::CannotClearRunning(id), "CANNOT_CLEAR_RUNNING", 409),
            (RunError::Internal("x".into()), "INTERNAL", 500),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.http_status(), status);
        }
    }

    #[test]
    fn config_errors_map_to_reasons() {
        let missing: RunError = ConfigError::FileNotFound("gone.strat".into()).into();
        assert_eq!(missing.code(), "FILE_NOT_FOUND");
        let bad: RunError = ConfigError::Invalid("currency_settings is empty".into()).into();
        assert_eq!(bad.code(), "CONFIG_INVALID");
        assert!(bad.to_string().contains("currency_settings is empty"));
    }
}
