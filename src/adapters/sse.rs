//! Server-Sent Events frame decoder.
//!
//! Handles:
//! - Line buffering across chunk boundaries (LF or CRLF)
//! - `event:` and `data:` fields, multi-line data joined with `\n`
//! - Comment lines (`:`) and unknown fields (`id`, `retry`) are ignored
//! - Frames are dispatched on a blank line; the default event name is
//!   `message`

/// Event name used when a frame has no `event:` field
pub const DEFAULT_EVENT: &str = "message";

/// A dispatched SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.feed_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush at end of stream: an unterminated last line and pending frame
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_string();
            if let Some(frame) = self.feed_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseFrame {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_named_event() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: step\ndata: {\"id\":1}\n\n");
        assert_eq!(frames, vec![frame("step", "{\"id\":1}")]);
    }

    #[test]
    fn test_default_event_name() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data:hello\n\n");
        assert_eq!(frames, vec![frame("message", "hello")]);
    }

    #[test]
    fn test_split_across_chunks_with_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: agent_log\r\nda").is_empty());
        assert!(decoder.push(b"ta: first\r\n").is_empty());
        let frames = decoder.push(b"data: second\r\n\r\n");
        assert_eq!(frames, vec![frame("agent_log", "first\nsecond")]);
    }

    #[test]
    fn test_comments_and_unknown_fields_ignored() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keepalive\nid: 7\nretry: 1000\ndata: x\n\n");
        assert_eq!(frames, vec![frame("message", "x")]);
    }

    #[test]
    fn test_blank_line_without_data_dispatches_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: step\n\n").is_empty());
        // The event name does not leak into the next frame
        let frames = decoder.push(b"data: y\n\n");
        assert_eq!(frames, vec![frame("message", "y")]);
    }

    #[test]
    fn test_finish_flushes_pending_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: log\ndata: tail").is_empty());
        assert_eq!(decoder.finish(), Some(frame("log", "tail")));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: a\n\ndata: b\n\n");
        assert_eq!(frames, vec![frame("message", "a"), frame("message", "b")]);
    }
}
