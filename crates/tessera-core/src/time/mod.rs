//! # Time Module
//!
//! Event-time progress for windowed operators.
//!
//! ## Concepts
//!
//! - **Event Time**: Timestamp carried by the record itself
//! - **Ingestion Time**: Creation timestamp of the buffer that carried the record
//! - **Watermark**: Assertion that no records with timestamp < watermark will arrive
//!
//! ## Multi-Origin Watermarks
//!
//! Operators fed by several upstream partitions only make progress up to the
//! slowest one. [`MultiOriginWatermarkProcessor`] applies per-origin watermarks
//! in sequence order and exposes their minimum:
//!
//! ```rust
//! use tessera_core::sequence::{OriginId, SequenceData};
//! use tessera_core::time::{MultiOriginWatermarkProcessor, Watermark};
//!
//! let processor = MultiOriginWatermarkProcessor::new([OriginId(1), OriginId(2)]);
//! processor.update(OriginId(1), SequenceData::single(1), Some(5000)).unwrap();
//! processor.update(OriginId(2), SequenceData::single(1), Some(3000)).unwrap();
//!
//! // Combined watermark is the minimum
//! assert_eq!(processor.current_watermark(), Some(Watermark::new(3000)));
//! ```

mod event_time;
mod watermark;

pub use event_time::{EventTimeError, TimeColumn, TimeFunction, TimestampFormat};
pub use watermark::{MultiOriginWatermarkProcessor, WatermarkMetrics, WatermarkTracker};

use crate::sequence::{OriginId, SequenceError};

/// Event-time progress: no record below this timestamp is expected anymore.
///
/// Slices ending at or below the watermark are finalized, windows ending at or
/// below it are probed, and records strictly below it are late.
///
/// ```rust
/// use tessera_core::time::Watermark;
///
/// let watermark = Watermark::new(1000);
/// assert!(watermark.is_late(999));
/// assert!(!watermark.is_late(1000));
/// assert!(Watermark::default().is_initial());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(pub i64);

impl Watermark {
    /// Creates a watermark at `timestamp` (milliseconds).
    #[inline]
    #[must_use]
    pub fn new(timestamp: i64) -> Self {
        Self(timestamp)
    }

    /// Returns the watermark timestamp in milliseconds.
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.0
    }

    /// Returns `true` if `event_time` is strictly below the watermark.
    #[inline]
    #[must_use]
    pub fn is_late(&self, event_time: i64) -> bool {
        event_time < self.0
    }

    /// Returns `true` if no progress has been made.
    #[inline]
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.0 == i64::MIN
    }

    /// Returns the watermark shifted back by `lateness_ms`, saturating at `i64::MIN`.
    #[must_use]
    pub fn with_lateness(self, lateness_ms: i64) -> Self {
        Self(self.0.saturating_sub(lateness_ms))
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self(i64::MIN)
    }
}

/// Time-related errors.
#[derive(Debug, thiserror::Error)]
pub enum TimeError {
    /// Watermark reported by an origin the processor does not know
    #[error("Unknown origin: {0}")]
    UnknownOrigin(OriginId),

    /// Watermark completion arrived out of protocol
    #[error("Watermark sequencing failed: {0}")]
    Sequence(#[from] SequenceError),

    /// Timestamp extraction failed
    #[error("Event time extraction failed: {0}")]
    EventTime(#[from] EventTimeError),
}
