//! Per-agent task lifecycle
//!
//! ```text
//! pending ──► running ──► completed
//!    │            └─────► failed
//!    └──────────────────► skipped
//! ```
//!
//! Terminal states are final. `skipped` is only reachable from `pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::state::models::AgentName;

/// Agent task status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state machine transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{agent}: cannot go from {from} to {to}")]
pub struct TransitionError {
    pub agent: AgentName,
    pub from: AgentStatus,
    pub to: AgentStatus,
}

/// One agent's run within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub agent: AgentName,
    pub status: AgentStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub percent_complete: u8,
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorKind>,
}

impl AgentTask {
    pub fn new(agent: AgentName) -> Self {
        Self {
            agent,
            status: AgentStatus::Pending,
            started_at: None,
            ended_at: None,
            percent_complete: 0,
            message: None,
            error: None,
        }
    }

    fn reject(&self, to: AgentStatus) -> TransitionError {
        TransitionError {
            agent: self.agent,
            from: self.status,
            to,
        }
    }

    /// pending → running
    pub fn start(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.status != AgentStatus::Pending {
            return Err(self.reject(AgentStatus::Running));
        }
        self.status = AgentStatus::Running;
        self.started_at = Some(Utc::now());
        self.message = Some(message.into());
        Ok(())
    }

    /// Record progress while running.
    ///
    /// The reported value is clamped to `[previous, 100]`; returns the value
    /// actually stored.
    pub fn report_progress(
        &mut self,
        percent: u8,
        message: Option<String>,
    ) -> Result<u8, TransitionError> {
        if self.status != AgentStatus::Running {
            return Err(self.reject(AgentStatus::Running));
        }
        self.percent_complete = percent.min(100).max(self.percent_complete);
        if message.is_some() {
            self.message = message;
        }
        Ok(self.percent_complete)
    }

    /// running → completed
    pub fn complete(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.status != AgentStatus::Running {
            return Err(self.reject(AgentStatus::Completed));
        }
        self.status = AgentStatus::Completed;
        self.percent_complete = 100;
        self.finish(message.into());
        Ok(())
    }

    /// running → failed
    pub fn fail(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if self.status != AgentStatus::Running {
            return Err(self.reject(AgentStatus::Failed));
        }
        self.status = AgentStatus::Failed;
        self.error = Some(kind);
        self.finish(message.into());
        Ok(())
    }

    /// pending → skipped
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        if self.status != AgentStatus::Pending {
            return Err(self.reject(AgentStatus::Skipped));
        }
        self.status = AgentStatus::Skipped;
        self.finish(reason.into());
        Ok(())
    }

    fn finish(&mut self, message: String) {
        self.ended_at = Some(Utc::now());
        self.message = Some(message);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_sets_timestamps_and_percent() {
        let mut task = AgentTask::new(AgentName::Static);
        assert_eq!(task.status, AgentStatus::Pending);
        assert!(task.started_at.is_none());

        task.start("running semgrep").unwrap();
        assert_eq!(task.status, AgentStatus::Running);
        assert!(task.started_at.is_some());
        assert!(task.ended_at.is_none());

        task.report_progress(40, None).unwrap();
        task.complete("done").unwrap();
        assert_eq!(task.status, AgentStatus::Completed);
        assert_eq!(task.percent_complete, 100);
        assert!(task.ended_at.is_some());
        assert_eq!(task.message.as_deref(), Some("done"));
    }

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let mut task = AgentTask::new(AgentName::Dast);
        task.start("go").unwrap();

        assert_eq!(task.report_progress(30, None).unwrap(), 30);
        assert_eq!(task.report_progress(10, None).unwrap(), 30);
        assert_eq!(task.report_progress(200, None).unwrap(), 100);
        assert_eq!(task.percent_complete, 100);
    }

    #[test]
    fn test_progress_rejected_unless_running() {
        let mut task = AgentTask::new(AgentName::Dast);
        assert!(task.report_progress(10, None).is_err());
        task.start("go").unwrap();
        task.complete("ok").unwrap();
        assert!(task.report_progress(10, None).is_err());
    }

    #[test]
    fn test_failed_keeps_last_percent_and_error_kind() {
        let mut task = AgentTask::new(AgentName::Fuzzer);
        task.start("go").unwrap();
        task.report_progress(55, Some("halfway".into())).unwrap();
        task.fail(ErrorKind::AdapterTimeout, "timed out").unwrap();

        assert_eq!(task.status, AgentStatus::Failed);
        assert_eq!(task.percent_complete, 55);
        assert_eq!(task.error, Some(ErrorKind::AdapterTimeout));
        assert!(task.ended_at.is_some());
    }

    #[test]
    fn test_skip_only_from_pending() {
        let mut task = AgentTask::new(AgentName::Report);
        task.skip("cancelled").unwrap();
        assert_eq!(task.status, AgentStatus::Skipped);
        assert_eq!(task.percent_complete, 0);

        let mut running = AgentTask::new(AgentName::Report);
        running.start("go").unwrap();
        let err = running.skip("late").unwrap_err();
        assert_eq!(err.from, AgentStatus::Running);
        assert_eq!(err.to, AgentStatus::Skipped);
    }

    #[test]
    fn test_terminal_states_never_restart() {
        for finish in [
            AgentStatus::Completed,
            AgentStatus::Failed,
            AgentStatus::Skipped,
        ] {
            let mut task = AgentTask::new(AgentName::Secret);
            match finish {
                AgentStatus::Skipped => task.skip("no").unwrap(),
                AgentStatus::Completed => {
                    task.start("go").unwrap();
                    task.complete("ok").unwrap();
                }
                _ => {
                    task.start("go").unwrap();
                    task.fail(ErrorKind::AdapterOutputError, "bad").unwrap();
                }
            }
            assert!(task.status.is_terminal());
            assert!(task.start("again").is_err());
            assert!(task.complete("again").is_err());
        }
    }
}
