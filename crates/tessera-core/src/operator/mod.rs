//! # Operator Module
//!
//! Windowed operators built on top of the slice store.
//!
//! ## Elements
//!
//! Upstream partitions deliver [`StreamElement`]s: record buffers and
//! watermarks, each tagged with its origin and a [`SequenceData`] descriptor.
//! Operators emit [`stream_join::JoinOutput`]s tagged with the operator's
//! output origin and a fresh sequence number.
//!
//! ## Lifecycle
//!
//! ```text
//! Created --setup()--> Ready --start()--> Running --stop(termination)--> Stopped
//! ```
//!
//! - [`window`]: window identifiers and time-based window assigners
//! - [`trigger`]: watermark-driven window trigger coordination
//! - [`stream_join`]: slice-based windowed stream join

use std::fmt;
use std::str::FromStr;

use arrow_array::RecordBatch;

use crate::config::ConfigError;
use crate::sequence::{OriginId, SequenceData, SequenceError};
use crate::slice::SliceError;
use crate::time::TimeError;

pub mod stream_join;
pub mod trigger;
pub mod window;

/// A batch of records from one upstream partition.
#[derive(Debug, Clone)]
pub struct RecordBuffer {
    /// Producing origin
    pub origin: OriginId,
    /// Position in the origin's stream
    pub sequence: SequenceData,
    /// Creation time of the buffer (milliseconds), used for ingestion time
    pub creation_timestamp: i64,
    /// Records
    pub batch: RecordBatch,
}

impl RecordBuffer {
    /// Creates a record buffer.
    #[must_use]
    pub fn new(
        origin: OriginId,
        sequence: SequenceData,
        creation_timestamp: i64,
        batch: RecordBatch,
    ) -> Self {
        Self {
            origin,
            sequence,
            creation_timestamp,
            batch,
        }
    }
}

/// Watermark announcement from one upstream partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkEvent {
    /// Producing origin
    pub origin: OriginId,
    /// Position in the origin's stream
    pub sequence: SequenceData,
    /// No record with a smaller timestamp follows from this origin
    pub watermark: i64,
}

impl WatermarkEvent {
    /// Creates a watermark event.
    #[must_use]
    pub fn new(origin: OriginId, sequence: SequenceData, watermark: i64) -> Self {
        Self {
            origin,
            sequence,
            watermark,
        }
    }
}

/// Unit of upstream input.
#[derive(Debug, Clone)]
pub enum StreamElement {
    /// Data records
    Records(RecordBuffer),
    /// Watermark
    Watermark(WatermarkEvent),
}

impl StreamElement {
    /// Returns the producing origin.
    #[must_use]
    pub fn origin(&self) -> OriginId {
        match self {
            Self::Records(buffer) => buffer.origin,
            Self::Watermark(event) => event.origin,
        }
    }

    /// Returns the sequence descriptor.
    #[must_use]
    pub fn sequence(&self) -> SequenceData {
        match self {
            Self::Records(buffer) => buffer.sequence,
            Self::Watermark(event) => event.sequence,
        }
    }

    /// Returns the carried watermark, if this is a watermark element.
    #[must_use]
    pub fn watermark(&self) -> Option<i64> {
        match self {
            Self::Records(_) => None,
            Self::Watermark(event) => Some(event.watermark),
        }
    }
}

impl From<RecordBuffer> for StreamElement {
    fn from(buffer: RecordBuffer) -> Self {
        Self::Records(buffer)
    }
}

impl From<WatermarkEvent> for StreamElement {
    fn from(event: WatermarkEvent) -> Self {
        Self::Watermark(event)
    }
}

/// How an operator is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TerminationType {
    /// Finalize and emit every outstanding window
    #[default]
    Graceful,
    /// Discard all state without emitting
    HardStop,
    /// Discard all state after an upstream failure
    Failure,
}

impl TerminationType {
    /// Returns `true` if outstanding windows are emitted on stop.
    #[must_use]
    pub fn drains(&self) -> bool {
        matches!(self, Self::Graceful)
    }
}

impl fmt::Display for TerminationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationType::Graceful => write!(f, "graceful"),
            TerminationType::HardStop => write!(f, "hard_stop"),
            TerminationType::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for TerminationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "graceful" => Ok(Self::Graceful),
            "hard_stop" | "hardstop" => Ok(Self::HardStop),
            "failure" => Ok(Self::Failure),
            _ => Err(format!("Unknown termination type: {s}")),
        }
    }
}

/// Lifecycle state of an operator handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorState {
    /// Constructed, not yet set up
    Created,
    /// Set up, not yet accepting input
    Ready,
    /// Accepting input
    Running,
    /// Stopped; all state released
    Stopped,
}

impl fmt::Display for OperatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorState::Created => write!(f, "Created"),
            OperatorState::Ready => write!(f, "Ready"),
            OperatorState::Running => write!(f, "Running"),
            OperatorState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Errors that can occur in operators
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// Lifecycle method called in the wrong state
    #[error("Cannot {action} an operator in state {state}")]
    InvalidLifecycle {
        /// Attempted transition
        action: &'static str,
        /// Current state
        state: OperatorState,
    },

    /// Input delivered while the operator is not running
    #[error("Operator is not running (state {0})")]
    NotRunning(OperatorState),

    /// Element from an origin the operator was not configured with
    #[error("Unknown origin: {0}")]
    UnknownOrigin(OriginId),

    /// Record batch does not match the configured schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Arrow kernel failure while assembling output
    #[error("Arrow error: {0}")]
    Arrow(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Slice store invariant violation
    #[error("Slice error: {0}")]
    Slice(#[from] SliceError),

    /// Sequencing failure
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    /// Watermark or event time failure
    #[error("Time error: {0}")]
    Time(#[from] TimeError),
}

impl From<arrow_schema::ArrowError> for OperatorError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        Self::Arrow(err.to_string())
    }
}
