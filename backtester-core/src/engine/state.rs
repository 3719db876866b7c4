//! Run lifecycle state and the control handle shared by the manager and the
//! engine task.
//!
//! The state lives in a `watch` channel. Every transition is a
//! compare-and-set on the channel value, and subscribers double as the
//! completion signal `stop` waits on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Created → Running → {Stopping → Stopped, Completed, Errored}.
/// Stopping may also end in Errored when closing positions fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    Running,
    Stopping,
    Stopped,
    Completed,
    Errored,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Stopped | RunState::Completed | RunState::Errored)
    }

    /// Running or Stopping: the engine task is alive.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Stopping)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Created => "created",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
            RunState::Completed => "completed",
            RunState::Errored => "errored",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunStatus {
    fn created() -> Self {
        Self { state: RunState::Created, started_at: None, ended_at: None, error: None }
    }
}

/// Cloneable handle to one run's state channel and cancellation token.
#[derive(Debug, Clone)]
pub struct RunControl {
    status: Arc<watch::Sender<RunStatus>>,
    cancel: CancellationToken,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunStatus::created());
        Self { status: Arc::new(tx), cancel: CancellationToken::new() }
    }

    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> RunState {
        self.status.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Apply `next` if the current state is `from`; otherwise return the
    /// current state unchanged.
    fn transition(&self, from: RunState, next: impl FnOnce(&mut RunStatus)) -> Result<(), RunState> {
        let mut observed = from;
        self.status.send_if_modified(|status| {
            observed = status.state;
            if status.state != from {
                return false;
            }
            next(status);
            true
        });
        if observed == from {
            Ok(())
        } else {
            Err(observed)
        }
    }

    /// Created → Running.
    pub fn mark_running(&self) -> Result<(), RunState> {
        self.transition(RunState::Created, |s| {
            s.state = RunState::Running;
            s.started_at = Some(Utc::now());
        })
    }

    /// Running → Stopping, then cancel the engine.
    pub fn request_stop(&self) -> Result<(), RunState> {
        self.transition(RunState::Running, |s| s.state = RunState::Stopping)?;
        self.cancel.cancel();
        Ok(())
    }

    /// Publish the engine's terminal state. A Completed result observed
    /// while Stopping is reported as Stopped. Later calls are ignored.
    pub fn finish(&self, state: RunState, error: Option<String>) {
        self.status.send_if_modified(|status| {
            if status.state.is_terminal() {
                return false;
            }
            status.state = match (status.state, state) {
                (RunState::Stopping, RunState::Completed) => RunState::Stopped,
                (_, next) => next,
            };
            status.error = error;
            status.ended_at = Some(Utc::now());
            true
        });
    }

    /// Wait until the run reaches a terminal state.
    pub async fn wait_terminal(&self) -> RunStatus {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|s| s.state.is_terminal()).await.map(|s| s.clone());
        match result {
            Ok(status) => status,
            Err(_) => self.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let control = RunControl::new();
        assert_eq!(control.state(), RunState::Created);
        control.mark_running().unwrap();
        assert!(control.status().started_at.is_some());
        assert_eq!(control.mark_running(), Err(RunState::Running));
        control.finish(RunState::Completed, None);
        assert_eq!(control.state(), RunState::Completed);
        assert!(control.status().ended_at.is_some());
    }

    #[test]
    fn stop_requires_running_and_cancels() {
        let control = RunControl::new();
        assert_eq!(control.request_stop(), Err(RunState::Created));
        control.mark_running().unwrap();
        let token = control.cancel_token();
        control.request_stop().unwrap();
        assert!(token.is_cancelled());
        assert_eq!(control.state(), RunState::Stopping);
        assert_eq!(control.request_stop(), Err(RunState::Stopping));
    }

    #[test]
    fn completion_during_stop_reads_as_stopped() {
        let control = RunControl::new();
        control.mark_running().unwrap();
        control.request_stop().unwrap();
        control.finish(RunState::Completed, None);
        assert_eq!(control.state(), RunState::Stopped);
    }

    #[test]
    fn terminal_state_is_final() {
        let control = RunControl::new();
        control.mark_running().unwrap();
        control.finish(RunState::Errored, Some("boom".into()));
        control.finish(RunState::Completed, None);
        let status = control.status();
        assert_eq!(status.state, RunState::Errored);
        assert_eq!(status.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn wait_terminal_resolves_on_finish() {
        let control = RunControl::new();
        control.mark_running().unwrap();
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_terminal().await })
        };
        tokio::task::yield_now().await;
        control.finish(RunState::Completed, None);
        let status = waiter.await.unwrap();
        assert_eq!(status.state, RunState::Completed);
    }
}
