//! Adapters for the agent server.
//!
//! Transports deliver raw progress events from the agent server; the source
//! adapter composes a preferred transport with a fallback into one ordered
//! channel. The agent client submits the automation run itself.

pub mod agent;
pub mod poll;
pub mod source;
pub mod sse;
pub mod stream;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::RawEvent;

// Re-export the concrete adapters
pub use agent::{AgentClient, AgentRunOptions, AutomationResult, Validation};
pub use poll::{PollTransport, ProgressCursor, ProgressResponse};
pub use source::{SourceAdapter, SourceHandle};
pub use stream::StreamTransport;

/// One item produced by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A progress event
    Event(RawEvent),

    /// Free-text run status reported by the server
    Status(String),
}

/// Errors a transport can report
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read response body: {0}")]
    Read(#[source] reqwest::Error),

    #[error("failed to decode progress response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A source of progress deliveries
#[async_trait]
pub trait Transport: Send {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Wait for the next batch of deliveries.
    ///
    /// `Ok(None)` means the transport has ended and will produce nothing more.
    /// A batch may be empty (a poll that found nothing new).
    async fn next_batch(&mut self) -> Result<Option<Vec<Delivery>>, TransportError>;

    /// Called once before this transport takes over from another one, with
    /// every event the other transport delivered. Transports that report
    /// cumulative state use it to avoid repeating those events.
    fn resume_after(&mut self, _delivered: &[RawEvent]) {}
}
