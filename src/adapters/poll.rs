//! Polling fallback transport.
//!
//! Fetches the agent server's progress endpoint on a fixed interval. The
//! endpoint reports cumulative state (full step and log lists, the whole agent
//! output so far), so a [`ProgressCursor`] remembers what was already
//! delivered and only new data is turned into events.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

use super::{Delivery, Transport, TransportError};
use crate::domain::{EventOrigin, LogRecord, Payload, RawEvent, StepRecord, StructuredPayload};

/// Agent output prefixes worth forwarding; everything else is library noise
const AGENT_OUTPUT_PREFIXES: &[&str] = &["INFO [agent]", "INFO [controller]", "INFO [testserver]"];

/// Body of the progress endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressResponse {
    /// Full list of steps so far
    #[serde(default)]
    pub steps: Option<Vec<Value>>,

    /// Full list of log records so far
    #[serde(default)]
    pub logs: Option<Vec<Value>>,

    /// Most recent log lines
    #[serde(default)]
    pub recent_logs: Option<Vec<Value>>,

    /// Raw agent process output so far
    #[serde(default)]
    pub agent_output: Option<String>,

    /// Free-text status
    #[serde(default)]
    pub status: Option<String>,
}

/// Remembers what earlier progress responses already delivered
#[derive(Debug, Default)]
pub struct ProgressCursor {
    /// Last emitted version of each step, keyed by id (or `#index`)
    steps: HashMap<String, StepRecord>,
    logs_seen: usize,
    recent_window: Vec<String>,
    output_lines_seen: usize,
    status: Option<String>,
    carried: Carryover,
}

/// Lines another transport delivered before this cursor took over, one
/// queue per text channel
#[derive(Debug, Default)]
struct Carryover {
    logs: VecDeque<String>,
    recent: VecDeque<String>,
    output: VecDeque<String>,
}

impl ProgressCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `delivered` as already emitted.
    ///
    /// Steps are remembered by id. Text lines are skipped the first time they
    /// show up, in order, in each cumulative channel.
    pub fn resume_after(&mut self, delivered: &[RawEvent]) {
        let mut lines = VecDeque::new();
        for event in delivered {
            match &event.payload {
                Payload::Text { line, .. } => lines.push_back(line.clone()),
                Payload::Structured(StructuredPayload::Log(record)) => {
                    lines.push_back(record.message.clone())
                }
                Payload::Structured(StructuredPayload::Step(record)) => {
                    if let Some(id) = record.step_id() {
                        self.steps.insert(id, record.clone());
                    }
                }
            }
        }

        debug!(lines = lines.len(), steps = self.steps.len(), "Resuming after earlier transport");
        self.carried = Carryover {
            logs: lines.clone(),
            recent: lines.clone(),
            output: lines,
        };
    }

    /// Turn a response into the deliveries not yet emitted
    pub fn absorb(&mut self, response: ProgressResponse) -> Vec<Delivery> {
        let mut out = Vec::new();

        if let Some(steps) = response.steps {
            self.absorb_steps(steps, &mut out);
        }
        if let Some(logs) = response.logs {
            self.absorb_logs(logs, &mut out);
        }
        if let Some(recent) = response.recent_logs {
            self.absorb_recent(recent.iter().map(value_text).collect(), &mut out);
        }
        if let Some(output) = response.agent_output {
            self.absorb_output(&output, &mut out);
        }
        if let Some(status) = response.status {
            if self.status.as_deref() != Some(status.as_str()) {
                self.status = Some(status.clone());
                out.push(Delivery::Status(status));
            }
        }

        out
    }

    fn absorb_steps(&mut self, steps: Vec<Value>, out: &mut Vec<Delivery>) {
        for (index, value) in steps.into_iter().enumerate() {
            let record = match serde_json::from_value::<StepRecord>(value) {
                Ok(record) => record,
                Err(e) => {
                    debug!(index, error = %e, "Skipping malformed step in progress response");
                    continue;
                }
            };

            let key = record.step_id().unwrap_or_else(|| format!("#{}", index));
            if self.steps.get(&key) == Some(&record) {
                continue;
            }
            self.steps.insert(key, record.clone());
            out.push(Delivery::Event(RawEvent::structured(
                EventOrigin::Poll,
                StructuredPayload::Step(record),
            )));
        }
    }

    fn absorb_logs(&mut self, logs: Vec<Value>, out: &mut Vec<Delivery>) {
        if logs.len() < self.logs_seen {
            // The server started a new list
            self.logs_seen = 0;
        }

        let total = logs.len();
        for entry in logs.into_iter().skip(self.logs_seen) {
            let event = match entry {
                Value::Object(map) => match serde_json::from_value::<LogRecord>(Value::Object(map.clone())) {
                    Ok(record) => RawEvent::structured(EventOrigin::Poll, StructuredPayload::Log(record)),
                    Err(_) => RawEvent::text(EventOrigin::Poll, None, Value::Object(map).to_string()),
                },
                other => RawEvent::text(EventOrigin::Poll, None, value_text(&other)),
            };
            let message = match &event.payload {
                Payload::Structured(StructuredPayload::Log(record)) => record.message.as_str(),
                Payload::Text { line, .. } => line.as_str(),
                Payload::Structured(StructuredPayload::Step(_)) => "",
            };
            if already_delivered(&mut self.carried.logs, message) {
                continue;
            }
            out.push(Delivery::Event(event));
        }
        self.logs_seen = total;
    }

    fn absorb_recent(&mut self, window: Vec<String>, out: &mut Vec<Delivery>) {
        let overlap = window_overlap(&self.recent_window, &window);
        for line in &window[overlap..] {
            if already_delivered(&mut self.carried.recent, line) {
                continue;
            }
            out.push(Delivery::Event(RawEvent::text(EventOrigin::Poll, None, line.clone())));
        }
        self.recent_window = window;
    }

    fn absorb_output(&mut self, output: &str, out: &mut Vec<Delivery>) {
        // Only newline-terminated lines; the last one may still be written
        let complete: Vec<&str> = match output.rfind('\n') {
            Some(end) => output[..end].split('\n').collect(),
            None => Vec::new(),
        };

        if complete.len() < self.output_lines_seen {
            self.output_lines_seen = 0;
        }

        for line in &complete[self.output_lines_seen..] {
            if let Some(message) = agent_message(line) {
                if already_delivered(&mut self.carried.output, message) {
                    continue;
                }
                out.push(Delivery::Event(RawEvent::text(EventOrigin::Poll, None, message)));
            }
        }
        self.output_lines_seen = complete.len();
    }
}

/// Extract the message from an agent output line such as
/// `INFO [agent] 📍 Step 1`. Lines from other loggers yield `None`.
pub fn agent_message(line: &str) -> Option<&str> {
    if !AGENT_OUTPUT_PREFIXES.iter().any(|prefix| line.contains(prefix)) {
        return None;
    }
    let start = line.find("INFO [")? + "INFO [".len();
    let rest = &line[start..];
    let message = rest[rest.find("] ")? + 2..].trim();
    (!message.is_empty()).then_some(message)
}

/// Consume `line` from the carried-over queue if it is still pending there.
///
/// Lines queued before the match were never echoed on this channel and are
/// dropped with it.
fn already_delivered(queue: &mut VecDeque<String>, line: &str) -> bool {
    match queue.iter().position(|pending| pending == line) {
        Some(index) => {
            queue.drain(..=index);
            true
        }
        None => false,
    }
}

/// Length of the longest suffix of `previous` that is a prefix of `next`
fn window_overlap(previous: &[String], next: &[String]) -> usize {
    let max = previous.len().min(next.len());
    (1..=max)
        .rev()
        .find(|&k| previous[previous.len() - k..] == next[..k])
        .unwrap_or(0)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Upper bound for one progress request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Polling transport
pub struct PollTransport {
    url: String,
    client: reqwest::Client,
    period: Duration,
    interval: Option<Interval>,
    cursor: ProgressCursor,
}

impl PollTransport {
    pub fn new(url: impl Into<String>, client: reqwest::Client, period: Duration) -> Self {
        Self {
            url: url.into(),
            client,
            period,
            interval: None,
            cursor: ProgressCursor::new(),
        }
    }

    async fn fetch(&self) -> Result<ProgressResponse, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|source| TransportError::Connect {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(TransportError::Read)?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl Transport for PollTransport {
    fn name(&self) -> &str {
        "poll"
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<Delivery>>, TransportError> {
        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;

        let response = self.fetch().await?;
        Ok(Some(self.cursor.absorb(response)))
    }

    fn resume_after(&mut self, delivered: &[RawEvent]) {
        self.cursor.resume_after(delivered);
    }
}
