//! # `Tessera` Core
//!
//! Time-sliced windowing and stream-join core for the `Tessera` stream processor.
//!
//! This crate provides:
//! - **Sequencer**: Per-origin reordering of chunked input, reused for watermark
//!   completion and output ordering
//! - **Slices**: Time-range state containers shared by overlapping windows
//! - **Slice Store**: Concurrent index of live slices with watermark-driven finalization
//! - **Slice Cache**: Thread-local replacement policies in front of the store
//! - **Stream Join**: Build/probe operators (nested-loop and hash) with a window trigger
//!   coordinator
//! - **Time**: Watermarks, multi-origin watermark processing, and time functions
//!
//! ## Data Flow
//!
//! ```text
//! Sequencer -> Join Build -> Slice Store (via Slice Cache)
//!           -> Watermark Processor -> Trigger Coordinator -> Join Probe
//!           -> Output Sequencer -> downstream
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::operator::stream_join::{StreamJoin, StreamJoinConfig};
//!
//! let join = StreamJoin::from_config(config)?;
//! join.setup()?;
//! join.start()?;
//!
//! let mut worker = join.worker()?;
//! let outputs = worker.ingest(element)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod operator;
pub mod sequence;
pub mod slice;
pub mod time;

// Re-export key types
pub use config::{SliceCacheConfig, SliceCacheType, WindowType};
pub use sequence::{OriginId, SequenceData, Sequencer};
pub use slice::{Slice, SliceId, SliceRange};
pub use time::Watermark;

/// Result type for tessera-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tessera-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Sequencing errors
    #[error("Sequence error: {0}")]
    Sequence(#[from] sequence::SequenceError),

    /// Slice and slice store errors
    #[error("Slice error: {0}")]
    Slice(#[from] slice::SliceError),

    /// Slice cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Operator errors
    #[error("Operator error: {0}")]
    Operator(#[from] operator::OperatorError),

    /// Time-related errors
    #[error("Time error: {0}")]
    Time(#[from] time::TimeError),
}
