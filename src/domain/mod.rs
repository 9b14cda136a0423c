//! Domain types for the trace reconstructor.
//!
//! This module contains the core data structures:
//! - Events: raw transport events and their classification
//! - Step: canonical unit of agent progress
//! - Run: state of the watched run

pub mod events;
pub mod run;
pub mod step;

// Re-export commonly used types
pub use events::{
    ClassifiedEvent, EventKind, EventOrigin, LogLevel, LogRecord, Payload, RawEvent, StepRecord,
    StepUpdate, StructuredPayload,
};
pub use run::{LogEntry, RunOutcome, RunState, RunStatus};
pub use step::{Step, StepAction, StepStatus};
