//! # Sequencer
//!
//! Per-origin reordering of chunked input.
//!
//! Upstream partitions deliver numbered, possibly chunked batches in arbitrary
//! order. A [`Sequencer`] buffers everything it cannot release yet and hands
//! items back in strict `(sequence_number, chunk_number)` order per origin:
//!
//! - a non-final chunk `(s, c)` advances the expected position to `(s, c + 1)`
//! - a final chunk `(s, c)` advances the expected position to `(s + 1, 1)`
//!
//! A gap stalls only the origin it belongs to. The same component is used at
//! every stage that needs per-origin order: raw input, watermark completion
//! and probe output.
//!
//! ```rust
//! use tessera_core::sequence::{OriginId, SequenceData, Sequencer};
//!
//! let sequencer = Sequencer::new();
//! let origin = OriginId(7);
//!
//! // Sequence 2 arrives first and is buffered
//! let released = sequencer.admit(origin, SequenceData::single(2), "b").unwrap();
//! assert!(released.is_empty());
//!
//! // Sequence 1 fills the gap and releases both
//! let released = sequencer.admit(origin, SequenceData::single(1), "a").unwrap();
//! assert_eq!(released, vec!["a", "b"]);
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use fxhash::FxHashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// First sequence number of every origin.
pub const INITIAL_SEQUENCE_NUMBER: u64 = 1;

/// First chunk number of every sequence.
pub const INITIAL_CHUNK_NUMBER: u64 = 1;

/// Default number of buffered items per origin before a stall warning is logged.
pub const DEFAULT_STALL_THRESHOLD: usize = 1024;

/// Identifier of an upstream partition or producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OriginId(pub u64);

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "origin-{}", self.0)
    }
}

/// Position of a batch in its origin's stream.
///
/// Ordering is lexicographic on `(sequence_number, chunk_number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceData {
    /// Sequence number, starting at 1
    pub sequence_number: u64,
    /// Chunk number inside the sequence, starting at 1
    pub chunk_number: u64,
    /// Whether this is the final chunk of the sequence
    pub last_chunk: bool,
}

impl SequenceData {
    /// Creates a sequence descriptor.
    #[must_use]
    pub fn new(sequence_number: u64, chunk_number: u64, last_chunk: bool) -> Self {
        Self {
            sequence_number,
            chunk_number,
            last_chunk,
        }
    }

    /// Creates a descriptor for an unchunked sequence.
    #[must_use]
    pub fn single(sequence_number: u64) -> Self {
        Self::new(sequence_number, INITIAL_CHUNK_NUMBER, true)
    }

    /// Returns the `(sequence_number, chunk_number)` position.
    #[inline]
    #[must_use]
    pub fn position(&self) -> (u64, u64) {
        (self.sequence_number, self.chunk_number)
    }

    fn is_valid(&self) -> bool {
        self.sequence_number >= INITIAL_SEQUENCE_NUMBER && self.chunk_number >= INITIAL_CHUNK_NUMBER
    }
}

impl Ord for SequenceData {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position()
            .cmp(&other.position())
            .then(self.last_chunk.cmp(&other.last_chunk))
    }
}

impl PartialOrd for SequenceData {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SequenceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sequence_number, self.chunk_number)?;
        if self.last_chunk {
            write!(f, "(last)")?;
        }
        Ok(())
    }
}

/// Errors raised while admitting items.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    /// The position was already released or is already buffered
    #[error("Duplicate sequence {sequence} for {origin}")]
    Duplicate {
        /// Origin of the rejected item
        origin: OriginId,
        /// Rejected descriptor
        sequence: SequenceData,
    },

    /// Sequence or chunk number is zero
    #[error("Invalid sequence descriptor {sequence} for {origin}: numbering starts at 1")]
    InvalidDescriptor {
        /// Origin of the rejected item
        origin: OriginId,
        /// Rejected descriptor
        sequence: SequenceData,
    },
}

/// Counters maintained by a [`Sequencer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerMetrics {
    /// Items accepted by `admit`
    pub admitted: u64,
    /// Items handed back in order
    pub released: u64,
    /// Items rejected as duplicates
    pub duplicates: u64,
    /// Stall warnings logged
    pub stall_warnings: u64,
}

/// Reorder buffer of a single origin.
struct OriginQueue<T> {
    next_sequence: u64,
    next_chunk: u64,
    /// Buffered items keyed by position, with their `last_chunk` flag.
    pending: BTreeMap<(u64, u64), (bool, T)>,
    stall_warned: bool,
}

impl<T> OriginQueue<T> {
    fn new() -> Self {
        Self {
            next_sequence: INITIAL_SEQUENCE_NUMBER,
            next_chunk: INITIAL_CHUNK_NUMBER,
            pending: BTreeMap::new(),
            stall_warned: false,
        }
    }

    fn expected(&self) -> (u64, u64) {
        (self.next_sequence, self.next_chunk)
    }

    fn advance(&mut self, last_chunk: bool) {
        if last_chunk {
            self.next_sequence += 1;
            self.next_chunk = INITIAL_CHUNK_NUMBER;
        } else {
            self.next_chunk += 1;
        }
    }

    fn drain_ready(&mut self, out: &mut Vec<T>) {
        loop {
            let expected = self.expected();
            let Some(entry) = self.pending.first_entry() else {
                break;
            };
            if *entry.key() != expected {
                break;
            }
            let (last_chunk, item) = entry.remove();
            out.push(item);
            self.advance(last_chunk);
        }
    }
}

struct SequencerState<T> {
    origins: FxHashMap<OriginId, OriginQueue<T>>,
    metrics: SequencerMetrics,
}

/// Releases items per origin in strict sequence order.
///
/// Thread-safe; all state lives behind one short critical section per call.
/// Origins are created lazily on their first item.
pub struct Sequencer<T> {
    state: Mutex<SequencerState<T>>,
    stall_threshold: usize,
}

impl<T> Sequencer<T> {
    /// Creates a sequencer with the default stall threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stall_threshold(DEFAULT_STALL_THRESHOLD)
    }

    /// Creates a sequencer that warns once an origin buffers `threshold` items.
    #[must_use]
    pub fn with_stall_threshold(threshold: usize) -> Self {
        Self {
            state: Mutex::new(SequencerState {
                origins: FxHashMap::default(),
                metrics: SequencerMetrics::default(),
            }),
            stall_threshold: threshold.max(1),
        }
    }

    /// Admits an item and returns every item of `origin` that became releasable,
    /// in order. The admitted item is part of the result when it filled the gap.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::Duplicate`] if the position was already released
    /// or is already buffered, and [`SequenceError::InvalidDescriptor`] for zero
    /// sequence or chunk numbers. The sequencer state is unchanged in both cases.
    pub fn admit(
        &self,
        origin: OriginId,
        sequence: SequenceData,
        item: T,
    ) -> Result<Vec<T>, SequenceError> {
        if !sequence.is_valid() {
            return Err(SequenceError::InvalidDescriptor { origin, sequence });
        }

        let mut state = self.state.lock();
        let SequencerState { origins, metrics } = &mut *state;
        let queue = origins.entry(origin).or_insert_with(OriginQueue::new);

        let position = sequence.position();
        if position < queue.expected() || queue.pending.contains_key(&position) {
            metrics.duplicates += 1;
            debug!("Rejecting duplicate {sequence} for {origin}");
            return Err(SequenceError::Duplicate { origin, sequence });
        }
        metrics.admitted += 1;

        let mut released = Vec::new();
        if position == queue.expected() {
            released.push(item);
            queue.advance(sequence.last_chunk);
            queue.drain_ready(&mut released);
            if queue.pending.len() < self.stall_threshold {
                queue.stall_warned = false;
            }
        } else {
            queue.pending.insert(position, (sequence.last_chunk, item));
            if queue.pending.len() >= self.stall_threshold && !queue.stall_warned {
                queue.stall_warned = true;
                metrics.stall_warnings += 1;
                let (next_sequence, next_chunk) = queue.expected();
                warn!(
                    "{origin} has {} buffered items waiting for sequence {next_sequence}.{next_chunk}",
                    queue.pending.len()
                );
            }
        }

        metrics.released += released.len() as u64;
        Ok(released)
    }

    /// Returns the number of items buffered for `origin`.
    #[must_use]
    pub fn pending(&self, origin: OriginId) -> usize {
        self.state
            .lock()
            .origins
            .get(&origin)
            .map_or(0, |queue| queue.pending.len())
    }

    /// Returns the number of items buffered across all origins.
    #[must_use]
    pub fn pending_total(&self) -> usize {
        self.state
            .lock()
            .origins
            .values()
            .map(|queue| queue.pending.len())
            .sum()
    }

    /// Returns the position `origin` is waiting for.
    #[must_use]
    pub fn expected(&self, origin: OriginId) -> (u64, u64) {
        self.state.lock().origins.get(&origin).map_or(
            (INITIAL_SEQUENCE_NUMBER, INITIAL_CHUNK_NUMBER),
            OriginQueue::expected,
        )
    }

    /// Returns origins with at least `threshold` buffered items, sorted.
    #[must_use]
    pub fn stalled_origins(&self, threshold: usize) -> Vec<OriginId> {
        let state = self.state.lock();
        let mut stalled: Vec<OriginId> = state
            .origins
            .iter()
            .filter(|(_, queue)| threshold > 0 && queue.pending.len() >= threshold)
            .map(|(origin, _)| *origin)
            .collect();
        stalled.sort_unstable();
        stalled
    }

    /// Drops every buffered item and returns how many were discarded.
    ///
    /// Expected positions are kept, so items already released stay rejected.
    pub fn discard_pending(&self) -> usize {
        let mut state = self.state.lock();
        let mut discarded = 0;
        for (origin, queue) in &mut state.origins {
            if !queue.pending.is_empty() {
                warn!("Discarding {} buffered items of {origin}", queue.pending.len());
            }
            discarded += queue.pending.len();
            queue.pending.clear();
            queue.stall_warned = false;
        }
        discarded
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> SequencerMetrics {
        self.state.lock().metrics
    }
}

impl<T> Default for Sequencer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Sequencer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Sequencer")
            .field("origins", &state.origins.len())
            .field("stall_threshold", &self.stall_threshold)
            .field("metrics", &state.metrics)
            .finish()
    }
}
