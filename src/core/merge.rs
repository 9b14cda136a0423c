//! Step merge engine.
//!
//! The only code that mutates a [`RunState`]. Annotations always target the
//! current step (the last one in the list); the only edit to earlier steps is
//! the completion sweep. Every applied event also appends one log entry.

use chrono::{DateTime, Utc};

use super::classifier::classify;
use crate::domain::{
    ClassifiedEvent, EventKind, LogEntry, LogLevel, RawEvent, RunOutcome, RunState, RunStatus,
    Step, StepStatus, StepUpdate,
};

/// What applying an event did to the step projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new step was appended
    Created { step_id: String },

    /// An existing step was modified
    Updated { step_id: String },

    /// The task-complete sweep ran and the run completed
    Completed,

    /// Only a log entry was written
    Logged,

    /// The run is terminal; nothing was applied
    Frozen,
}

/// Apply a classified event to the run state
pub fn apply(state: &mut RunState, event: &ClassifiedEvent) -> MergeOutcome {
    if state.is_terminal() {
        return MergeOutcome::Frozen;
    }

    state.log.push(LogEntry {
        timestamp: event.timestamp,
        level: event.level,
        message: event.message.clone(),
    });

    let at = event.timestamp;
    match &event.kind {
        EventKind::StepMarker(update) => merge_marker(state, update, at),
        EventKind::GoalAnnounce { goal } => with_current(state, at, |step| {
            step.description = Some(goal.clone());
            step.goal = Some(goal.clone());
        }),
        EventKind::ActionAnnounce { action } => with_current(state, at, |step| {
            step.action = Some(action.clone());
            step.transition(StepStatus::Running);
        }),
        EventKind::EvalResult { text, success } => with_current(state, at, |step| {
            step.evaluation = Some(text.clone());
            step.transition(if *success {
                StepStatus::Success
            } else {
                StepStatus::Warning
            });
        }),
        EventKind::MemoryNote { text } => with_current(state, at, |step| {
            step.memory = Some(text.clone());
        }),
        EventKind::ControllerResult { text } => with_current(state, at, |step| {
            step.controller_result = Some(text.clone());
            step.transition(StepStatus::Success);
        }),
        EventKind::TaskComplete => {
            for step in &mut state.steps {
                step.status = StepStatus::Success;
                step.timestamp = at;
            }
            finish(state, RunStatus::Completed, at);
            MergeOutcome::Completed
        }
        EventKind::LogLine | EventKind::RawLog => MergeOutcome::Logged,
    }
}

/// Record the free-text status reported by the polling endpoint
pub fn apply_server_status(state: &mut RunState, status: &str) -> bool {
    let status = status.trim();
    if state.is_terminal() || status.is_empty() || state.server_status.as_deref() == Some(status) {
        return false;
    }
    state.server_status = Some(status.to_string());
    true
}

/// Apply a terminal signal reported by the caller.
///
/// Returns `false` when the run had already turned terminal.
pub fn apply_outcome(state: &mut RunState, outcome: RunOutcome) -> bool {
    if state.is_terminal() {
        return false;
    }

    let at = Utc::now();
    let (level, message) = match &outcome {
        RunOutcome::Completed => (LogLevel::Success, "Automation completed successfully".to_string()),
        RunOutcome::Failed { message } => (LogLevel::Error, format!("Automation failed: {}", message)),
        RunOutcome::Error { message } => (
            LogLevel::Error,
            format!("Error executing automation: {}", message),
        ),
    };
    state.log.push(LogEntry {
        timestamp: at,
        level,
        message,
    });

    finish(state, outcome.into_status(), at);
    true
}

/// Mark a fresh run as consuming events
pub fn begin(state: &mut RunState) {
    if state.status == RunStatus::Idle {
        state.status = RunStatus::Running;
    }
}

/// Rebuild a run from a recorded event sequence
pub fn replay<I>(events: I) -> RunState
where
    I: IntoIterator<Item = RawEvent>,
{
    let mut state = RunState::new();
    begin(&mut state);
    for event in events {
        apply(&mut state, &classify(&event));
    }
    state
}

fn finish(state: &mut RunState, status: RunStatus, at: DateTime<Utc>) {
    state.status = status;
    state.finished_at = Some(at);
}

fn merge_marker(state: &mut RunState, update: &StepUpdate, at: DateTime<Utc>) -> MergeOutcome {
    let Some(id) = update.id.as_deref() else {
        // No id: the marker annotates whatever step is current
        return with_current(state, at, |step| merge_fields(step, update));
    };

    if let Some(step) = state.steps.iter_mut().find(|s| s.id == id) {
        merge_fields(step, update);
        step.timestamp = at;
        return MergeOutcome::Updated {
            step_id: step.id.clone(),
        };
    }

    let mut step = Step::new(id, at);
    step.description = update.default_description.clone();
    merge_fields(&mut step, update);
    state.steps.push(step);

    MergeOutcome::Created {
        step_id: id.to_string(),
    }
}

fn merge_fields(step: &mut Step, update: &StepUpdate) {
    if let Some(description) = &update.description {
        step.description = Some(description.clone());
    }
    if let Some(goal) = &update.goal {
        step.goal = Some(goal.clone());
        if update.description.is_none() {
            step.description = Some(goal.clone());
        }
    }
    if let Some(action) = &update.action {
        step.action = Some(action.clone());
    }
    if let Some(evaluation) = &update.evaluation {
        step.evaluation = Some(evaluation.clone());
    }
    if let Some(memory) = &update.memory {
        step.memory = Some(memory.clone());
    }
    if let Some(controller_result) = &update.controller_result {
        step.controller_result = Some(controller_result.clone());
    }
    if let Some(status) = update.status {
        step.transition(status);
    }
}

fn with_current<F>(state: &mut RunState, at: DateTime<Utc>, mutate: F) -> MergeOutcome
where
    F: FnOnce(&mut Step),
{
    match state.steps.last_mut() {
        Some(step) => {
            mutate(step);
            step.timestamp = at;
            MergeOutcome::Updated {
                step_id: step.id.clone(),
            }
        }
        None => MergeOutcome::Logged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventOrigin;

    fn line(text: &str) -> ClassifiedEvent {
        classify(&RawEvent::text(EventOrigin::Stream, None, text))
    }

    #[test]
    fn test_marker_creates_running_step() {
        let mut state = RunState::new();
        let outcome = apply(&mut state, &line("📍 Step 1"));

        assert_eq!(outcome, MergeOutcome::Created { step_id: "1".to_string() });
        assert_eq!(state.steps.len(), 1);
        assert_eq!(state.steps[0].status, StepStatus::Running);
        assert_eq!(state.steps[0].description.as_deref(), Some("Step 1"));
    }

    #[test]
    fn test_repeated_marker_keeps_goal_description() {
        let mut state = RunState::new();
        apply(&mut state, &line("📍 Step 1"));
        apply(&mut state, &line("🎯 Next goal: Log in"));
        apply(&mut state, &line("📍 Step 1"));

        assert_eq!(state.steps.len(), 1);
        assert_eq!(state.steps[0].description.as_deref(), Some("Log in"));
        assert_eq!(state.log.len(), 3);
    }

    #[test]
    fn test_action_does_not_reopen_finished_step() {
        let mut state = RunState::new();
        apply(&mut state, &line("📍 Step 1"));
        apply(&mut state, &line("🔗 Navigated to https://example.com"));
        apply(&mut state, &line(r#"🛠️ Action 1/1: {"done":{}}"#));

        assert_eq!(state.steps[0].status, StepStatus::Success);
        assert!(state.steps[0].action.is_some());
    }

    #[test]
    fn test_warning_upgrades_to_success() {
        let mut state = RunState::new();
        apply(&mut state, &line("📍 Step 1"));
        apply(&mut state, &line("🤷 Eval: Unknown"));
        assert_eq!(state.steps[0].status, StepStatus::Warning);

        apply(&mut state, &line(r#"🛠️ Action 1/1: {"scroll_down":{}}"#));
        assert_eq!(state.steps[0].status, StepStatus::Running);

        apply(&mut state, &line("👍 Eval: Success"));
        assert_eq!(state.steps[0].status, StepStatus::Success);
    }

    #[test]
    fn test_memory_leaves_status() {
        let mut state = RunState::new();
        apply(&mut state, &line("📍 Step 1"));
        apply(&mut state, &line("🤷 Eval: Unknown"));
        apply(&mut state, &line("🧠 Memory: halfway"));

        assert_eq!(state.steps[0].memory.as_deref(), Some("halfway"));
        assert_eq!(state.steps[0].status, StepStatus::Warning);
    }

    #[test]
    fn test_terminal_run_is_frozen() {
        let mut state = RunState::new();
        apply(&mut state, &line("📍 Step 1"));
        apply(&mut state, &line("✅ Task completed"));
        let log_len = state.log.len();

        assert_eq!(apply(&mut state, &line("📍 Step 2")), MergeOutcome::Frozen);
        assert_eq!(state.steps.len(), 1);
        assert_eq!(state.log.len(), log_len);
        assert!(!apply_outcome(&mut state, RunOutcome::Failed { message: "late".into() }));
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[test]
    fn test_outcome_logs_and_terminates() {
        let mut state = RunState::new();
        begin(&mut state);
        assert!(apply_outcome(
            &mut state,
            RunOutcome::Failed {
                message: "max steps reached".to_string()
            }
        ));

        assert_eq!(
            state.status,
            RunStatus::Failed {
                message: "max steps reached".to_string()
            }
        );
        let last = state.log.last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.message, "Automation failed: max steps reached");
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn test_replay_runs_to_completion() {
        let events = ["📍 Step 1", "🎯 Next goal: Open site", "✅ Task completed"]
            .into_iter()
            .map(|text| RawEvent::text(EventOrigin::Poll, None, text));

        let state = replay(events);
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.steps[0].goal.as_deref(), Some("Open site"));
        assert_eq!(state.log.len(), 3);
    }

    #[test]
    fn test_server_status_changes_only() {
        let mut state = RunState::new();
        assert!(apply_server_status(&mut state, "Running step 2"));
        assert!(!apply_server_status(&mut state, "Running step 2 "));
        assert!(!apply_server_status(&mut state, "  "));
        assert_eq!(state.server_status.as_deref(), Some("Running step 2"));
    }
}
