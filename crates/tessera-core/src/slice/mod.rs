//! # Slices
//!
//! A slice is the state of one half-open time range `[start, end)`. Windows
//! are composed of one slice (tumbling) or several shared slices (sliding),
//! so every record is stored once no matter how many windows it belongs to.
//!
//! ## Lifecycle
//!
//! ```text
//! Open ──(watermark >= end)──> Finalized ──(all windows probed)──> Disposed
//! ```
//!
//! Transitions are forward-only and performed with atomic compare-exchange,
//! so concurrent watermark advances finalize a slice exactly once.
//!
//! ## Modules
//!
//! - [`assigner`]: maps timestamps to slice ranges and slices to windows
//! - [`paged`]: append-only paged vector used as lock-free slice storage
//! - [`store`]: the concurrent index of live slices

pub mod assigner;
pub mod paged;
pub mod store;

pub use assigner::{SliceAssigner, TimeWindowAssigner};
pub use paged::{PagedVec, DEFAULT_PAGE_CAPACITY};
pub use store::{SliceFinalized, SliceStore, SliceStoreConfig, SliceStoreMetrics};

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::time::{TimeError, Watermark};

/// Stable identifier of a slice within its store.
///
/// Identifiers are never reused, so a cached `SliceId` whose slice was
/// disposed cannot alias a newer slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceId(pub u64);

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slice-{}", self.0)
    }
}

/// Half-open time range `[start, end)` covered by a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceRange {
    /// Start timestamp (inclusive, in milliseconds)
    pub start: i64,
    /// End timestamp (exclusive, in milliseconds)
    pub end: i64,
}

impl SliceRange {
    /// Creates a slice range.
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Returns `true` if `timestamp` falls inside the range.
    #[inline]
    #[must_use]
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    /// Returns the range width in milliseconds.
    #[must_use]
    pub fn width_ms(&self) -> i64 {
        self.end - self.start
    }
}

impl fmt::Display for SliceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Lifecycle state of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SliceLifecycle {
    /// Accepting records
    Open = 0,
    /// Closed by the watermark, readable by probes
    Finalized = 1,
    /// Removed from the store
    Disposed = 2,
}

impl SliceLifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Finalized,
            _ => Self::Disposed,
        }
    }
}

impl fmt::Display for SliceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceLifecycle::Open => write!(f, "Open"),
            SliceLifecycle::Finalized => write!(f, "Finalized"),
            SliceLifecycle::Disposed => write!(f, "Disposed"),
        }
    }
}

/// State of one time range.
///
/// The payload `S` is operator specific: the stream join stores both sides'
/// records, an aggregation would store partial aggregates.
#[derive(Debug)]
pub struct Slice<S> {
    id: SliceId,
    range: SliceRange,
    lifecycle: AtomicU8,
    state: S,
}

impl<S> Slice<S> {
    /// Creates an open slice.
    #[must_use]
    pub fn new(id: SliceId, range: SliceRange, state: S) -> Self {
        Self {
            id,
            range,
            lifecycle: AtomicU8::new(SliceLifecycle::Open as u8),
            state,
        }
    }

    /// Returns the slice identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SliceId {
        self.id
    }

    /// Returns the covered range.
    #[inline]
    #[must_use]
    pub fn range(&self) -> SliceRange {
        self.range
    }

    /// Returns the start timestamp (inclusive).
    #[inline]
    #[must_use]
    pub fn start(&self) -> i64 {
        self.range.start
    }

    /// Returns the end timestamp (exclusive).
    #[inline]
    #[must_use]
    pub fn end(&self) -> i64 {
        self.range.end
    }

    /// Returns the operator payload.
    #[inline]
    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn lifecycle(&self) -> SliceLifecycle {
        SliceLifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// Returns `true` while the slice accepts records.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lifecycle() == SliceLifecycle::Open
    }

    /// Moves `Open -> Finalized`.
    ///
    /// Returns `true` for exactly one caller; every other caller, and any call
    /// on an already finalized or disposed slice, gets `false`.
    pub fn try_finalize(&self) -> bool {
        self.lifecycle
            .compare_exchange(
                SliceLifecycle::Open as u8,
                SliceLifecycle::Finalized as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves the slice to `Disposed` and returns the state it left.
    pub(crate) fn mark_disposed(&self) -> SliceLifecycle {
        SliceLifecycle::from_u8(
            self.lifecycle
                .swap(SliceLifecycle::Disposed as u8, Ordering::AcqRel),
        )
    }
}

/// Slice and slice store errors.
#[derive(Debug, thiserror::Error)]
pub enum SliceError {
    /// Record timestamp below the effective watermark
    #[error("Late record: timestamp {timestamp} is below watermark {}", .watermark.timestamp())]
    Late {
        /// Record timestamp
        timestamp: i64,
        /// Effective watermark at rejection time
        watermark: Watermark,
    },

    /// No window containing the timestamp fits in `i64`
    #[error("Timestamp {timestamp} is outside the windowable range")]
    OutOfRange {
        /// Record timestamp
        timestamp: i64,
    },

    /// A live slice with the same end but a different range exists
    #[error("Duplicate slice for end {}: requested {requested}, existing {existing}", .requested.end)]
    DuplicateSlice {
        /// Range computed for the record
        requested: SliceRange,
        /// Range of the live slice
        existing: SliceRange,
    },

    /// Watermark bookkeeping failed
    #[error("Watermark error: {0}")]
    Watermark(#[from] TimeError),
}
