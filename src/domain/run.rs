//! Run state for the currently watched automation run.
//!
//! A `RunState` is owned by exactly one writer (the merge engine running on
//! the session's consumer task). Everyone else sees cloned snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::LogLevel;
use super::step::Step;

/// State of the active run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Identifier for correlating traces
    pub run_id: Uuid,

    /// Overall status
    pub status: RunStatus,

    /// Ordered steps reconstructed so far
    pub steps: Vec<Step>,

    /// Every applied event, in order
    pub log: Vec<LogEntry>,

    /// Last free-text status reported by the polling endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_status: Option<String>,

    /// When the run was initialized
    pub started_at: DateTime<Utc>,

    /// When the run turned terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Fresh idle state for a new run
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Idle,
            steps: Vec::new(),
            log: Vec::new(),
            server_status: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// The step annotations apply to
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall status of a run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Initialized, not consuming events yet
    #[default]
    Idle,

    /// Events are being applied
    Running,

    /// The agent finished the task
    Completed,

    /// The agent reported failure
    Failed { message: String },

    /// The run could not be carried out
    Error { message: String },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Error { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Error { .. } => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { message } | Self::Error { message } => {
                write!(f, "{}: {}", self.label(), message)
            }
            _ => f.write_str(self.label()),
        }
    }
}

/// One line of the run's audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Terminal signal reported by the caller (not derived from log text)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The agent reported success
    Completed,

    /// The agent reported failure
    Failed { message: String },

    /// The run could not be executed (transport or server error)
    Error { message: String },
}

impl RunOutcome {
    pub fn into_status(self) -> RunStatus {
        match self {
            Self::Completed => RunStatus::Completed,
            Self::Failed { message } => RunStatus::Failed { message },
            Self::Error { message } => RunStatus::Error { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_creation() {
        let run = RunState::new();
        assert_eq!(run.status, RunStatus::Idle);
        assert!(run.steps.is_empty());
        assert!(run.log.is_empty());
        assert!(!run.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let status = RunStatus::Failed {
            message: "element not found".to_string(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"status":"failed","message":"element not found"}"#);
        assert!(status.is_terminal());
        assert_eq!(status.to_string(), "failed: element not found");
    }
}
