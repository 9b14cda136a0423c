//! Canonical step records.
//!
//! A step is one unit of agent progress (one "📍 Step N" cycle of the
//! browser agent). Fields are filled in incrementally as annotation lines
//! arrive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single step of agent progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier, unique within a run
    pub id: String,

    /// Human-readable description (the goal once one is announced)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Goal announced by the agent for this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    /// Action the agent decided on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<StepAction>,

    /// Evaluation of the previous action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<String>,

    /// Agent memory / progress note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// Last observed controller side effect (navigation, click, input)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_result: Option<String>,

    /// Current status
    pub status: StepStatus,

    /// Time of last mutation
    pub timestamp: DateTime<Utc>,
}

impl Step {
    /// Create a new running step
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            description: None,
            goal: None,
            action: None,
            evaluation: None,
            memory: None,
            controller_result: None,
            status: StepStatus::Running,
            timestamp,
        }
    }

    /// Move to `next` unless the current status forbids it.
    ///
    /// Terminal statuses are sticky. Returns whether the status changed.
    pub fn transition(&mut self, next: StepStatus) -> bool {
        if self.status.is_terminal() || self.status == next {
            return false;
        }
        self.status = next;
        true
    }

    /// Text best describing what the step is doing
    pub fn headline(&self) -> &str {
        self.goal
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Action descriptor, structured when the agent printed valid JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepAction {
    Structured(serde_json::Value),
    Raw(String),
}

impl StepAction {
    /// Parse an action payload, keeping it as raw text when it is not JSON
    pub fn parse(payload: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Raw(payload.to_string()),
        }
    }

    /// Build from an already-decoded JSON value (bare strings stay raw)
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::Raw(s),
            other => Self::Structured(other),
        }
    }
}

/// Status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Agent is working on it
    #[default]
    Running,

    /// Finished successfully
    Success,

    /// Evaluation was inconclusive; can still be upgraded
    Warning,

    /// Failed
    Error,
}

impl StepStatus {
    /// `success` and `error` are terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Map a server-reported status string
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "running" | "pending" | "in_progress" | "active" => Some(Self::Running),
            "success" | "completed" | "complete" | "done" | "passed" => Some(Self::Success),
            "warning" | "unknown" => Some(Self::Warning),
            "error" | "failed" | "failure" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut step = Step::new("1", Utc::now());
        assert!(step.transition(StepStatus::Warning));
        assert!(step.transition(StepStatus::Success));
        assert!(!step.transition(StepStatus::Running));
        assert!(!step.transition(StepStatus::Error));
        assert_eq!(step.status, StepStatus::Success);
    }

    #[test]
    fn test_action_parse_falls_back_to_raw() {
        assert_eq!(
            StepAction::parse(r#"{"click_element":{"index":3}}"#),
            StepAction::Structured(serde_json::json!({"click_element": {"index": 3}}))
        );
        assert_eq!(
            StepAction::parse("{click_element: 3"),
            StepAction::Raw("{click_element: 3".to_string())
        );
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(StepStatus::from_label("Completed"), Some(StepStatus::Success));
        assert_eq!(StepStatus::from_label("failed"), Some(StepStatus::Error));
        assert_eq!(StepStatus::from_label("pending"), Some(StepStatus::Running));
        assert_eq!(StepStatus::from_label("whatever"), None);
    }
}
