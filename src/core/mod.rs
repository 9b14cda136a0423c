//! Core reconstruction logic.
//!
//! This module contains:
//! - Classifier: raw events to typed events
//! - Merge: the single writer of run state
//! - Tracker: overall status and progress text
//! - Session: source adapter and consumer tasks for one run

pub mod classifier;
pub mod merge;
pub mod session;
pub mod tracker;

// Re-export commonly used types
pub use classifier::{classify, classify_line};
pub use merge::{apply, replay, MergeOutcome};
pub use session::{RunSnapshot, TraceSession};
pub use tracker::{derive_status, Progress};
