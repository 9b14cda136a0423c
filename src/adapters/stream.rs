//! Server-push progress transport.
//!
//! Connects to the agent server's SSE endpoint and turns every frame into one
//! raw event, in arrival order. The connection is established lazily on the
//! first read and is never re-established: a failed or closed stream is the
//! source adapter's cue to fall back to polling.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{debug, info};

use super::sse::{SseDecoder, SseFrame};
use super::{Delivery, Transport, TransportError};
use crate::domain::{EventOrigin, LogLevel, LogRecord, RawEvent, StepRecord, StructuredPayload};

type ByteStream = BoxStream<'static, Result<Vec<u8>, reqwest::Error>>;

/// SSE transport
pub struct StreamTransport {
    url: String,
    client: reqwest::Client,
    body: Option<ByteStream>,
    decoder: SseDecoder,
    ended: bool,
}

impl StreamTransport {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
            body: None,
            decoder: SseDecoder::new(),
            ended: false,
        }
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
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

        info!(url = %self.url, "Progress stream connected");
        self.body = Some(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
        );
        Ok(())
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn name(&self) -> &str {
        "stream"
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<Delivery>>, TransportError> {
        if self.ended {
            return Ok(None);
        }
        if self.body.is_none() {
            self.connect().await?;
        }

        loop {
            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };

            match body.next().await {
                Some(Ok(chunk)) => {
                    let frames = self.decoder.push(&chunk);
                    if !frames.is_empty() {
                        debug!(frames = frames.len(), "Received progress frames");
                        return Ok(Some(frames.iter().map(to_delivery).collect()));
                    }
                }
                Some(Err(e)) => {
                    self.body = None;
                    self.ended = true;
                    return Err(TransportError::Read(e));
                }
                None => {
                    self.body = None;
                    self.ended = true;
                    return Ok(self.decoder.finish().map(|frame| vec![to_delivery(&frame)]));
                }
            }
        }
    }
}

fn to_delivery(frame: &SseFrame) -> Delivery {
    Delivery::Event(frame_to_event(frame))
}

/// Map one SSE frame to a raw event.
///
/// `log` and `agent_log` frames carry agent output and are kept as text so
/// the classifier can read their markers; the generic `message` channel uses
/// a `type` discriminator for structured payloads.
pub fn frame_to_event(frame: &SseFrame) -> RawEvent {
    let origin = EventOrigin::Stream;
    let text = |level: Option<LogLevel>, line: &str| RawEvent::text(origin, level, line);
    let json = serde_json::from_str::<Value>(&frame.data).ok();

    match (frame.event.as_str(), json) {
        ("step", Some(value @ Value::Object(_))) => match serde_json::from_value::<StepRecord>(value) {
            Ok(record) => RawEvent::structured(origin, StructuredPayload::Step(record)),
            Err(_) => text(None, &frame.data),
        },
        ("log", Some(Value::Object(map))) => {
            let level = map.get("level").and_then(Value::as_str).map(LogLevel::parse);
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(frame.data.as_str());
            text(level, message)
        }
        ("agent_log", Some(Value::String(message))) => text(Some(LogLevel::Info), &message),
        ("agent_log", Some(Value::Object(map))) => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(frame.data.as_str());
            text(Some(LogLevel::Info), message)
        }
        ("log" | "agent_log", _) => text(Some(LogLevel::Info), &frame.data),
        (_, Some(Value::Object(map))) => {
            let kind = map.get("type").and_then(Value::as_str).map(str::to_owned);
            let has_message = map.get("message").and_then(Value::as_str).is_some();
            structured_message(kind.as_deref(), has_message, map)
                .unwrap_or_else(|| text(None, &frame.data))
        }
        _ => text(None, &frame.data),
    }
}

/// Decode a generic `message` frame carrying a `type` discriminator
fn structured_message(
    kind: Option<&str>,
    has_message: bool,
    map: serde_json::Map<String, Value>,
) -> Option<RawEvent> {
    let origin = EventOrigin::Stream;
    match kind {
        Some("log") if has_message => serde_json::from_value::<LogRecord>(Value::Object(map))
            .ok()
            .map(|record| RawEvent::structured(origin, StructuredPayload::Log(record))),
        Some("step") => map
            .get("step")
            .cloned()
            .and_then(|step| serde_json::from_value::<StepRecord>(step).ok())
            .map(|record| RawEvent::structured(origin, StructuredPayload::Step(record))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Payload;

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    fn text_of(event: &RawEvent) -> (Option<LogLevel>, &str) {
        match &event.payload {
            Payload::Text { level, line } => (*level, line.as_str()),
            other => panic!("expected text payload, got {:?}", other),
        }
    }

    #[test]
    fn test_step_frame_is_structured() {
        let event = frame_to_event(&frame("step", r#"{"id": 3, "goal": "Search"}"#));
        assert_eq!(event.source, EventOrigin::Stream);
        match event.payload {
            Payload::Structured(StructuredPayload::Step(record)) => {
                assert_eq!(record.step_id().as_deref(), Some("3"));
                assert_eq!(record.goal.as_deref(), Some("Search"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_log_frame_keeps_level_and_message() {
        let event = frame_to_event(&frame("log", r#"{"level": "warning", "message": "📍 Step 2"}"#));
        assert_eq!(text_of(&event), (Some(LogLevel::Warning), "📍 Step 2"));
    }

    #[test]
    fn test_agent_log_variants() {
        let event = frame_to_event(&frame("agent_log", r#"{"message": "🧠 Memory: x"}"#));
        assert_eq!(text_of(&event), (Some(LogLevel::Info), "🧠 Memory: x"));

        let event = frame_to_event(&frame("agent_log", r#""🎯 Next goal: y""#));
        assert_eq!(text_of(&event), (Some(LogLevel::Info), "🎯 Next goal: y"));

        let event = frame_to_event(&frame("agent_log", "not json"));
        assert_eq!(text_of(&event), (Some(LogLevel::Info), "not json"));
    }

    #[test]
    fn test_message_frame_with_type_discriminator() {
        let event = frame_to_event(&frame("message", r#"{"type": "log", "level": "ERROR", "message": "boom"}"#));
        match event.payload {
            Payload::Structured(StructuredPayload::Log(record)) => {
                assert_eq!(record.message, "boom");
                assert_eq!(record.level.as_deref(), Some("ERROR"));
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let event = frame_to_event(&frame("message", r#"{"type": "step", "step": {"stepNumber": 5}}"#));
        assert!(matches!(
            event.payload,
            Payload::Structured(StructuredPayload::Step(_))
        ));
    }

    #[test]
    fn test_opaque_message_is_text() {
        let event = frame_to_event(&frame("message", "👍 Eval: Success"));
        assert_eq!(text_of(&event), (None, "👍 Eval: Success"));

        let event = frame_to_event(&frame("message", r#"{"type": "step"}"#));
        assert_eq!(text_of(&event), (None, r#"{"type": "step"}"#));
    }
}
