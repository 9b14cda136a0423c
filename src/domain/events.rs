//! Raw and classified progress events.
//!
//! A [`RawEvent`] is what a transport delivered; a [`ClassifiedEvent`] is the
//! same event tagged with the semantic kind the merge engine acts on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::{StepAction, StepStatus};

/// A timestamped unit of progress arriving from a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Transport that delivered the event
    pub source: EventOrigin,

    /// When the event was received
    pub received_at: DateTime<Utc>,

    /// Event content
    pub payload: Payload,
}

impl RawEvent {
    /// Create a text event with an optional declared level
    pub fn text(source: EventOrigin, level: Option<LogLevel>, line: impl Into<String>) -> Self {
        Self {
            source,
            received_at: Utc::now(),
            payload: Payload::Text {
                level,
                line: line.into(),
            },
        }
    }

    /// Create a structured event
    pub fn structured(source: EventOrigin, payload: StructuredPayload) -> Self {
        Self {
            source,
            received_at: Utc::now(),
            payload: Payload::Structured(payload),
        }
    }
}

/// Which transport produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// Server-push SSE stream
    Stream,

    /// Polling fallback
    Poll,
}

impl std::fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

/// Content of a raw event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "payload")]
pub enum Payload {
    /// Payload with an explicit type discriminator
    Structured(StructuredPayload),

    /// Opaque text line
    Text {
        level: Option<LogLevel>,
        line: String,
    },
}

/// Structured payloads recognized by type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StructuredPayload {
    Log(LogRecord),
    Step(StepRecord),
}

/// A log record as the agent server reports it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A step as the agent server reports it.
///
/// Accepts both camelCase and snake_case keys; ids may be numbers or strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,

    #[serde(default, alias = "step_number", skip_serializing_if = "Option::is_none")]
    pub step_number: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(
        default,
        alias = "controllerAction",
        alias = "controller_result",
        skip_serializing_if = "Option::is_none"
    )]
    pub controller_result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl StepRecord {
    /// Identifier from `id`, falling back to `stepNumber`
    pub fn step_id(&self) -> Option<String> {
        self.id
            .as_ref()
            .and_then(id_from_value)
            .or_else(|| self.step_number.as_ref().and_then(id_from_value))
    }
}

fn id_from_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    /// Parse a level name; unknown names map to INFO
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Self::Debug,
            "SUCCESS" => Self::Success,
            "WARN" | "WARNING" => Self::Warning,
            "ERROR" | "CRITICAL" | "FATAL" => Self::Error,
            _ => Self::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw event tagged with its semantic kind
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    /// Transport that delivered the event
    pub source: EventOrigin,

    /// Receive time of the underlying raw event
    pub timestamp: DateTime<Utc>,

    /// Level for the log entry
    pub level: LogLevel,

    /// Message for the log entry
    pub message: String,

    /// What the event means for the step projection
    pub kind: EventKind,
}

/// Semantic kinds of progress events
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Log record reported as such by the server
    LogLine,

    /// Start of (or update to) a step
    StepMarker(StepUpdate),

    /// The agent's goal for the current step
    GoalAnnounce { goal: String },

    /// The action chosen for the current step
    ActionAnnounce { action: StepAction },

    /// Evaluation of the previous action
    EvalResult { text: String, success: bool },

    /// Memory / progress note
    MemoryNote { text: String },

    /// Observed controller side effect
    ControllerResult { text: String },

    /// The agent reported the whole task as done
    TaskComplete,

    /// Anything else
    RawLog,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LogLine => "log_line",
            Self::StepMarker(_) => "step_marker",
            Self::GoalAnnounce { .. } => "goal_announce",
            Self::ActionAnnounce { .. } => "action_announce",
            Self::EvalResult { .. } => "eval_result",
            Self::MemoryNote { .. } => "memory_note",
            Self::ControllerResult { .. } => "controller_result",
            Self::TaskComplete => "task_complete",
            Self::RawLog => "raw_log",
        }
    }
}

/// Fields carried by a step marker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepUpdate {
    pub id: Option<String>,
    /// Description used only when the marker creates the step
    pub default_description: Option<String>,
    pub description: Option<String>,
    pub goal: Option<String>,
    pub action: Option<StepAction>,
    pub evaluation: Option<String>,
    pub memory: Option<String>,
    pub controller_result: Option<String>,
    pub status: Option<StepStatus>,
}

impl StepUpdate {
    /// Marker for a numbered step seen in agent output
    pub fn numbered(number: u64) -> Self {
        Self {
            id: Some(number.to_string()),
            default_description: Some(format!("Step {}", number)),
            ..Default::default()
        }
    }
}

impl From<&StepRecord> for StepUpdate {
    fn from(record: &StepRecord) -> Self {
        Self {
            id: record.step_id(),
            default_description: None,
            description: record.description.clone(),
            goal: record.goal.clone(),
            action: record.action.clone().map(StepAction::from_value),
            evaluation: record.evaluation.clone(),
            memory: record.memory.clone(),
            controller_result: record.controller_result.clone(),
            status: record.status.as_deref().and_then(StepStatus::from_label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_record_accepts_numeric_and_camel_case_ids() {
        let record: StepRecord =
            serde_json::from_str(r#"{"stepNumber": 4, "controllerAction": "🖱️ Clicked"}"#).unwrap();
        assert_eq!(record.step_id(), Some("4".to_string()));
        assert_eq!(record.controller_result.as_deref(), Some("🖱️ Clicked"));

        let record: StepRecord = serde_json::from_str(r#"{"id": " 7 ", "step_number": 2}"#).unwrap();
        assert_eq!(record.step_id(), Some("7".to_string()));
    }

    #[test]
    fn test_step_record_without_id() {
        let record: StepRecord = serde_json::from_str(r#"{"description": "x"}"#).unwrap();
        assert_eq!(record.step_id(), None);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("warn"), LogLevel::Warning);
        assert_eq!(LogLevel::parse("SUCCESS"), LogLevel::Success);
        assert_eq!(LogLevel::parse("verbose"), LogLevel::Info);
    }

    #[test]
    fn test_structured_update_maps_status() {
        let record = StepRecord {
            id: Some(serde_json::json!(3)),
            status: Some("completed".to_string()),
            action: Some(serde_json::json!("go_to_url")),
            ..Default::default()
        };
        let update = StepUpdate::from(&record);
        assert_eq!(update.id.as_deref(), Some("3"));
        assert_eq!(update.status, Some(StepStatus::Success));
        assert_eq!(update.action, Some(StepAction::Raw("go_to_url".to_string())));
    }
}
