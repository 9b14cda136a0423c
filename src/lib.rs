//! steptrace - Live execution trace reconstructor
//!
//! Watches a browser-automation agent while it runs and rebuilds a structured
//! trace of the steps it takes, from whatever progress signals the agent
//! server exposes.
//!
//! # Architecture
//!
//! Progress flows one way through a single writer:
//! - Transports (SSE stream, polling fallback) deliver raw events in order
//! - The classifier tags each event with a semantic kind
//! - The merge engine folds classified events into the run state
//! - Readers receive cloned snapshots with derived progress text
//!
//! # Modules
//!
//! - `adapters`: Agent server transports and client
//! - `core`: Classifier, merge engine, tracker, trace session
//! - `domain`: Data structures (RawEvent, Step, RunState)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a task and trace it
//! steptrace run "search for rust books on example.com"
//!
//! # Attach to a run already in progress
//! steptrace watch
//!
//! # Rebuild a trace from captured agent output
//! steptrace replay agent.log
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{SourceAdapter, Transport};
pub use core::{RunSnapshot, TraceSession};
pub use domain::{RawEvent, RunOutcome, RunState, RunStatus, Step, StepStatus};
