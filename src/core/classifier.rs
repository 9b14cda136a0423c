//! Line/event classifier.
//!
//! Maps every raw event to exactly one semantic kind. Structured payloads
//! short-circuit on their type; text lines go through an ordered rule list
//! where the first match wins and anything unrecognized becomes `RawLog`.
//!
//! Tokens are the markers the browser agent prints in its log output:
//!
//! ```text
//! 📍 Step 3
//! 🎯 Next goal: Open the login page
//! 🛠️ Action 1/2: {"go_to_url":{"url":"https://example.com"}}
//! 👍 Eval: Success - page loaded
//! 🧠 Memory: Logged in, 2 of 5 items checked
//! 🔗 Navigated to https://example.com
//! ✅ Task completed successfully
//! ```

use crate::domain::{
    ClassifiedEvent, EventKind, LogLevel, Payload, RawEvent, StepAction, StepUpdate,
    StructuredPayload,
};

const STEP_TOKEN: &str = "📍 Step";
const GOAL_TOKEN: &str = "🎯 Next goal:";
const ACTION_TOKENS: &[&str] = &["🛠️ Action", "🛠 Action"];
const EVAL_SUCCESS_TOKEN: &str = "👍 Eval:";
const EVAL_UNKNOWN_TOKEN: &str = "🤷 Eval:";
const MEMORY_TOKEN: &str = "🧠 Memory:";
const CONTROLLER_TOKENS: &[&str] = &[
    "🔗 Navigated to",
    "🖱️ Clicked",
    "🖱 Clicked",
    "⌨️ Input",
    "⌨ Input",
];
const COMPLETION_TOKENS: &[&str] = &["✅ Task completed", "✅ Successfully"];

type TextRule = fn(&str) -> Option<EventKind>;

/// Text rules in priority order
const TEXT_RULES: &[TextRule] = &[
    step_marker,
    goal_announce,
    action_announce,
    eval_result,
    memory_note,
    controller_result,
    task_complete,
];

/// Classify a raw event. Pure and total.
pub fn classify(event: &RawEvent) -> ClassifiedEvent {
    let (level, message, kind) = match &event.payload {
        Payload::Structured(StructuredPayload::Log(record)) => (
            record
                .level
                .as_deref()
                .map(LogLevel::parse)
                .unwrap_or_default(),
            record.message.clone(),
            EventKind::LogLine,
        ),
        Payload::Structured(StructuredPayload::Step(record)) => {
            let update = StepUpdate::from(record);
            let message = describe_update(&update);
            (LogLevel::Info, message, EventKind::StepMarker(update))
        }
        Payload::Text { level, line } => (level.unwrap_or_default(), line.clone(), classify_line(line)),
    };

    ClassifiedEvent {
        source: event.source,
        timestamp: event.received_at,
        level,
        message,
        kind,
    }
}

/// Classify a single text line
pub fn classify_line(line: &str) -> EventKind {
    TEXT_RULES
        .iter()
        .find_map(|rule| rule(line))
        .unwrap_or(EventKind::RawLog)
}

fn step_marker(line: &str) -> Option<EventKind> {
    let rest = after(line, STEP_TOKEN)?.trim_start();
    let (digits, _) = split_digits(rest)?;
    let number = digits.parse::<u64>().ok()?;
    Some(EventKind::StepMarker(StepUpdate::numbered(number)))
}

fn goal_announce(line: &str) -> Option<EventKind> {
    let goal = capture(after(line, GOAL_TOKEN)?)?;
    Some(EventKind::GoalAnnounce { goal })
}

fn action_announce(line: &str) -> Option<EventKind> {
    let rest = ACTION_TOKENS.iter().find_map(|token| after(line, token))?;

    // "<index>/<total>: <payload>"
    let (_, rest) = split_digits(rest.trim_start())?;
    let rest = rest.strip_prefix('/')?;
    let (_, rest) = split_digits(rest)?;
    let payload = capture(rest.strip_prefix(':')?)?;

    Some(EventKind::ActionAnnounce {
        action: StepAction::parse(&payload),
    })
}

fn eval_result(line: &str) -> Option<EventKind> {
    let (rest, success) = match after(line, EVAL_SUCCESS_TOKEN) {
        Some(rest) => (rest, true),
        None => (after(line, EVAL_UNKNOWN_TOKEN)?, false),
    };
    let text = capture(rest)?;
    Some(EventKind::EvalResult { text, success })
}

fn memory_note(line: &str) -> Option<EventKind> {
    let text = capture(after(line, MEMORY_TOKEN)?)?;
    Some(EventKind::MemoryNote { text })
}

fn controller_result(line: &str) -> Option<EventKind> {
    CONTROLLER_TOKENS
        .iter()
        .any(|token| line.contains(token))
        .then(|| EventKind::ControllerResult {
            text: line.trim().to_string(),
        })
}

fn task_complete(line: &str) -> Option<EventKind> {
    COMPLETION_TOKENS
        .iter()
        .any(|token| line.contains(token))
        .then_some(EventKind::TaskComplete)
}

/// Text after the first occurrence of `token`
fn after<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    line.find(token).map(|idx| &line[idx + token.len()..])
}

/// Trailing content up to the end of the line, trimmed; `None` when empty
fn capture(rest: &str) -> Option<String> {
    let text = rest.split('\n').next().unwrap_or_default().trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Split a leading run of ASCII digits off `s`
fn split_digits(s: &str) -> Option<(&str, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    (end > 0).then(|| s.split_at(end))
}

fn describe_update(update: &StepUpdate) -> String {
    let detail = update
        .goal
        .as_deref()
        .or(update.description.as_deref())
        .or(update.status.map(|s| s.as_str()));

    match (&update.id, detail) {
        (Some(id), Some(detail)) => format!("Step {}: {}", id, detail),
        (Some(id), None) => format!("Step {}", id),
        (None, Some(detail)) => format!("Step update: {}", detail),
        (None, None) => "Step update".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventOrigin, LogRecord, StepRecord, StepStatus};

    #[test]
    fn test_step_marker() {
        let kind = classify_line("INFO [agent] 📍 Step 12");
        assert_eq!(kind, EventKind::StepMarker(StepUpdate::numbered(12)));
    }

    #[test]
    fn test_step_marker_without_number_is_raw() {
        assert_eq!(classify_line("📍 Step abc"), EventKind::RawLog);
        assert_eq!(classify_line("📍 Step"), EventKind::RawLog);
    }

    #[test]
    fn test_goal_announce() {
        assert_eq!(
            classify_line("🎯 Next goal: Fill in the login form  "),
            EventKind::GoalAnnounce {
                goal: "Fill in the login form".to_string()
            }
        );
        assert_eq!(classify_line("🎯 Next goal:   "), EventKind::RawLog);
    }

    #[test]
    fn test_action_announce_structured_and_raw() {
        assert_eq!(
            classify_line(r#"🛠️ Action 1/2: {"click_element":{"index":5}}"#),
            EventKind::ActionAnnounce {
                action: StepAction::Structured(serde_json::json!({"click_element": {"index": 5}}))
            }
        );
        assert_eq!(
            classify_line("🛠 Action 2/2: click_element(index=5"),
            EventKind::ActionAnnounce {
                action: StepAction::Raw("click_element(index=5".to_string())
            }
        );
    }

    #[test]
    fn test_action_without_index_pair_is_raw() {
        assert_eq!(classify_line("🛠️ Action: click"), EventKind::RawLog);
        assert_eq!(classify_line("🛠️ Action 1/: click"), EventKind::RawLog);
        assert_eq!(classify_line("🛠️ Action 1/2 click"), EventKind::RawLog);
    }

    #[test]
    fn test_eval_variants() {
        assert_eq!(
            classify_line("👍 Eval: Success - the page loaded"),
            EventKind::EvalResult {
                text: "Success - the page loaded".to_string(),
                success: true
            }
        );
        assert_eq!(
            classify_line("🤷 Eval: Unknown - nothing happened"),
            EventKind::EvalResult {
                text: "Unknown - nothing happened".to_string(),
                success: false
            }
        );
    }

    #[test]
    fn test_memory_and_controller() {
        assert_eq!(
            classify_line("🧠 Memory: 2 of 3 fields done"),
            EventKind::MemoryNote {
                text: "2 of 3 fields done".to_string()
            }
        );
        assert_eq!(
            classify_line(" 🖱️ Clicked button with index 4: Login "),
            EventKind::ControllerResult {
                text: "🖱️ Clicked button with index 4: Login".to_string()
            }
        );
        assert!(matches!(
            classify_line("⌨️ Input testuser into index 2"),
            EventKind::ControllerResult { .. }
        ));
    }

    #[test]
    fn test_completion() {
        assert_eq!(classify_line("✅ Task completed"), EventKind::TaskComplete);
        assert_eq!(
            classify_line("✅ Successfully logged in"),
            EventKind::TaskComplete
        );
        assert_eq!(classify_line("✅ done"), EventKind::RawLog);
    }

    #[test]
    fn test_priority_first_match_wins() {
        // A goal line that also mentions a navigation is still a goal
        assert!(matches!(
            classify_line("🎯 Next goal: check 🔗 Navigated to result"),
            EventKind::GoalAnnounce { .. }
        ));
        // Step marker outranks completion
        assert!(matches!(
            classify_line("📍 Step 3 ✅ Task completed"),
            EventKind::StepMarker(_)
        ));
    }

    #[test]
    fn test_structured_payloads_short_circuit() {
        let log = RawEvent::structured(
            EventOrigin::Stream,
            StructuredPayload::Log(LogRecord {
                level: Some("error".to_string()),
                message: "📍 Step 9".to_string(),
                timestamp: None,
            }),
        );
        let classified = classify(&log);
        assert_eq!(classified.kind, EventKind::LogLine);
        assert_eq!(classified.level, LogLevel::Error);

        let step = RawEvent::structured(
            EventOrigin::Poll,
            StructuredPayload::Step(StepRecord {
                id: Some(serde_json::json!(2)),
                goal: Some("Search".to_string()),
                status: Some("success".to_string()),
                ..Default::default()
            }),
        );
        let classified = classify(&step);
        assert_eq!(classified.message, "Step 2: Search");
        match classified.kind {
            EventKind::StepMarker(update) => {
                assert_eq!(update.id.as_deref(), Some("2"));
                assert_eq!(update.status, Some(StepStatus::Success));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_text_keeps_declared_level() {
        let event = RawEvent::text(EventOrigin::Stream, Some(LogLevel::Warning), "disk almost full");
        let classified = classify(&event);
        assert_eq!(classified.kind, EventKind::RawLog);
        assert_eq!(classified.level, LogLevel::Warning);

        let event = RawEvent::text(EventOrigin::Stream, None, "plain");
        assert_eq!(classify(&event).level, LogLevel::Info);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let event = RawEvent::text(EventOrigin::Poll, None, "🤷 Eval: Unknown");
        assert_eq!(classify(&event), classify(&event));
    }
}
