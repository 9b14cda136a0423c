//! Status/progress tracker.
//!
//! Pure projection of a [`RunState`] into the status line a display shows.

use serde::Serialize;

use crate::domain::{RunState, RunStatus};

/// Label shown before any event has been applied
pub const STARTING_LABEL: &str = "Starting automation...";

/// Label shown while running and no step describes itself yet
pub const RUNNING_LABEL: &str = "Running automation...";

/// Derived overall status and progress text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub overall_status: RunStatus,
    pub progress_text: String,
}

/// Derive the overall status and progress text from run state
pub fn derive_status(state: &RunState) -> Progress {
    let progress_text = match &state.status {
        RunStatus::Completed => "Completed successfully".to_string(),
        RunStatus::Failed { message } => format!("Failed: {}", message),
        RunStatus::Error { message } => format!("Error occurred: {}", message),
        RunStatus::Idle => STARTING_LABEL.to_string(),
        RunStatus::Running => state
            .current_step()
            .and_then(|step| step.goal.as_deref().or(step.description.as_deref()))
            .or(state.server_status.as_deref())
            .unwrap_or(RUNNING_LABEL)
            .to_string(),
    };

    Progress {
        overall_status: state.status.clone(),
        progress_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::merge;
    use crate::domain::{RunOutcome, Step};
    use chrono::Utc;

    #[test]
    fn test_lifecycle_labels() {
        let mut state = RunState::new();
        assert_eq!(derive_status(&state).progress_text, STARTING_LABEL);

        merge::begin(&mut state);
        let progress = derive_status(&state);
        assert_eq!(progress.overall_status, RunStatus::Running);
        assert_eq!(progress.progress_text, RUNNING_LABEL);
    }

    #[test]
    fn test_prefers_goal_then_description_then_server_status() {
        let mut state = RunState::new();
        merge::begin(&mut state);
        merge::apply_server_status(&mut state, "Agent busy");
        assert_eq!(derive_status(&state).progress_text, "Agent busy");

        let mut step = Step::new("1", Utc::now());
        state.steps.push(step.clone());
        assert_eq!(derive_status(&state).progress_text, "Agent busy");

        step.description = Some("Step 1".to_string());
        state.steps[0] = step.clone();
        assert_eq!(derive_status(&state).progress_text, "Step 1");

        step.goal = Some("Open settings".to_string());
        state.steps[0] = step;
        assert_eq!(derive_status(&state).progress_text, "Open settings");
    }

    #[test]
    fn test_terminal_text() {
        let mut state = RunState::new();
        merge::begin(&mut state);
        merge::apply_outcome(
            &mut state,
            RunOutcome::Error {
                message: "connection refused".to_string(),
            },
        );
        assert_eq!(
            derive_status(&state).progress_text,
            "Error occurred: connection refused"
        );
    }
}
