//! Slice store.
//!
//! The store owns every live slice of one operator instance. Slices are
//! indexed by their end timestamp in an ordered map, which is what both
//! finalization (`end <= watermark`) and window composition (`end` inside a
//! window) scan.
//!
//! ## Concurrency
//!
//! - Lookups take the index read lock; creation takes the write lock and
//!   re-checks, so two writers racing for the same range get the same slice.
//! - Finalization walks the index under the read lock and flips lifecycles
//!   with compare-exchange, so every slice is finalized exactly once.
//! - Lateness is re-checked under the write lock before inserting, so a slice
//!   is never created behind a finalization pass that already ran.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Slice, SliceAssigner, SliceError, SliceId, SliceLifecycle, SliceRange};
use crate::config::OverflowPolicy;
use crate::operator::window::WindowId;
use crate::sequence::{OriginId, SequenceData, DEFAULT_STALL_THRESHOLD};
use crate::time::{MultiOriginWatermarkProcessor, Watermark};

/// Slice store options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceStoreConfig {
    /// Grace period subtracted from the global watermark (milliseconds)
    pub allowed_lateness_ms: i64,
    /// Maximum number of open slices before the overflow policy applies
    pub max_open_slices: Option<usize>,
    /// What to do when `max_open_slices` is exceeded
    pub overflow_policy: OverflowPolicy,
    /// Buffered watermark completions per origin before a stall warning
    pub stall_threshold: usize,
}

impl SliceStoreConfig {
    /// Sets the allowed lateness.
    #[must_use]
    pub fn with_allowed_lateness(mut self, allowed_lateness_ms: i64) -> Self {
        self.allowed_lateness_ms = allowed_lateness_ms.max(0);
        self
    }

    /// Caps the number of open slices.
    #[must_use]
    pub fn with_max_open_slices(mut self, max: usize, policy: OverflowPolicy) -> Self {
        self.max_open_slices = Some(max.max(1));
        self.overflow_policy = policy;
        self
    }

    /// Sets the stall threshold of the watermark completion sequencer.
    #[must_use]
    pub fn with_stall_threshold(mut self, threshold: usize) -> Self {
        self.stall_threshold = threshold;
        self
    }
}

impl Default for SliceStoreConfig {
    fn default() -> Self {
        Self {
            allowed_lateness_ms: 0,
            max_open_slices: None,
            overflow_policy: OverflowPolicy::Warn,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }
}

/// Emitted once per slice when the effective watermark passes its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceFinalized {
    /// Finalized slice
    pub id: SliceId,
    /// Its range
    pub range: SliceRange,
    /// Effective watermark that finalized it
    pub watermark: Watermark,
}

/// Snapshot of slice store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceStoreMetrics {
    /// Slices created
    pub slices_created: u64,
    /// Slices finalized
    pub slices_finalized: u64,
    /// Slices disposed
    pub slices_disposed: u64,
    /// Records rejected as late
    pub late_records: u64,
    /// Times the open-slice cap was exceeded
    pub overflow_events: u64,
    /// Slices finalized early by the overflow policy
    pub forced_finalizations: u64,
}

#[derive(Debug, Default)]
struct StoreCounters {
    slices_created: AtomicU64,
    slices_finalized: AtomicU64,
    slices_disposed: AtomicU64,
    late_records: AtomicU64,
    overflow_events: AtomicU64,
    forced_finalizations: AtomicU64,
}

/// Concurrent index of live slices.
pub struct SliceStore<S, A> {
    assigner: A,
    config: SliceStoreConfig,
    /// Live slices keyed by end timestamp
    index: RwLock<BTreeMap<i64, Arc<Slice<S>>>>,
    watermarks: MultiOriginWatermarkProcessor,
    /// Watermark floor raised by the overflow policy and by `finalize_all`
    forced_watermark: AtomicI64,
    next_slice_id: AtomicU64,
    open_slices: AtomicUsize,
    counters: StoreCounters,
}

impl<S, A> SliceStore<S, A>
where
    S: Default,
    A: SliceAssigner,
{
    /// Creates a store fed by the given origins.
    #[must_use]
    pub fn new(
        assigner: A,
        origins: impl IntoIterator<Item = OriginId>,
        config: SliceStoreConfig,
    ) -> Self {
        Self {
            assigner,
            watermarks: MultiOriginWatermarkProcessor::with_stall_threshold(
                origins,
                config.stall_threshold,
            ),
            config,
            index: RwLock::new(BTreeMap::new()),
            forced_watermark: AtomicI64::new(i64::MIN),
            next_slice_id: AtomicU64::new(1),
            open_slices: AtomicUsize::new(0),
            counters: StoreCounters::default(),
        }
    }

    /// Returns the slice assigner.
    #[must_use]
    pub fn assigner(&self) -> &A {
        &self.assigner
    }

    /// Returns the store options.
    #[must_use]
    pub fn config(&self) -> &SliceStoreConfig {
        &self.config
    }

    /// Returns the multi-origin watermark processor.
    #[must_use]
    pub fn watermarks(&self) -> &MultiOriginWatermarkProcessor {
        &self.watermarks
    }

    /// Returns the watermark used for lateness and finalization:
    /// the global watermark minus the allowed lateness, raised to the forced floor.
    #[inline]
    #[must_use]
    pub fn effective_watermark(&self) -> Watermark {
        let shifted = self
            .watermarks
            .watermark()
            .with_lateness(self.config.allowed_lateness_ms);
        shifted.max(Watermark::new(self.forced_watermark.load(Ordering::Acquire)))
    }

    /// Rejects timestamps below the effective watermark.
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::Late`] and counts the record.
    pub fn check_lateness(&self, timestamp: i64) -> Result<(), SliceError> {
        let watermark = self.effective_watermark();
        if watermark.is_late(timestamp) {
            self.counters.late_records.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Dropping late record at {timestamp}, watermark {}",
                watermark.timestamp()
            );
            return Err(SliceError::Late {
                timestamp,
                watermark,
            });
        }
        Ok(())
    }

    /// Returns the slice containing `timestamp`, creating it if needed.
    ///
    /// Concurrent callers for the same range always receive the same slice.
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::Late`] if the timestamp is below the effective
    /// watermark (no slice is created), [`SliceError::OutOfRange`] if the
    /// timestamp's windows do not fit in `i64`, and
    /// [`SliceError::DuplicateSlice`] if a live slice with the same end covers
    /// a different range.
    pub fn get_or_create_slice(&self, timestamp: i64) -> Result<Arc<Slice<S>>, SliceError> {
        self.check_lateness(timestamp)?;
        let range = self
            .assigner
            .slice_range(timestamp)
            .ok_or(SliceError::OutOfRange { timestamp })?;

        if let Some(existing) = self.index.read().get(&range.end) {
            return Self::matching(existing, range);
        }

        let mut index = self.index.write();
        if let Some(existing) = index.get(&range.end) {
            return Self::matching(existing, range);
        }
        // Finalization may have run between the first check and the write lock
        self.check_lateness(timestamp)?;

        let id = SliceId(self.next_slice_id.fetch_add(1, Ordering::Relaxed));
        let slice = Arc::new(Slice::new(id, range, S::default()));
        index.insert(range.end, Arc::clone(&slice));
        let open = self.open_slices.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.slices_created.fetch_add(1, Ordering::Relaxed);
        debug!("Created {id} for {range}");

        if let Some(max) = self.config.max_open_slices {
            if open > max {
                self.on_overflow(&index, open, max);
            }
        }
        Ok(slice)
    }

    fn matching(
        existing: &Arc<Slice<S>>,
        requested: SliceRange,
    ) -> Result<Arc<Slice<S>>, SliceError> {
        if existing.range() == requested {
            Ok(Arc::clone(existing))
        } else {
            Err(SliceError::DuplicateSlice {
                requested,
                existing: existing.range(),
            })
        }
    }

    fn on_overflow(&self, index: &BTreeMap<i64, Arc<Slice<S>>>, open: usize, max: usize) {
        self.counters.overflow_events.fetch_add(1, Ordering::Relaxed);
        match self.config.overflow_policy {
            OverflowPolicy::Warn => {
                warn!("{open} open slices exceed the limit of {max}");
            }
            OverflowPolicy::ForceFinalize => {
                if let Some(oldest) = index.values().find(|slice| slice.is_open()) {
                    self.forced_watermark
                        .fetch_max(oldest.end(), Ordering::AcqRel);
                    self.counters
                        .forced_finalizations
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "{open} open slices exceed the limit of {max}, forcing finalization up to {}",
                        oldest.end()
                    );
                }
            }
        }
    }

    /// Records a watermark of `origin` without sequence ordering.
    ///
    /// Returns the new global watermark if it advanced. Call
    /// [`finalize_pending`](Self::finalize_pending) to finalize slices.
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::Watermark`] for unknown origins.
    pub fn update_watermark(
        &self,
        origin: OriginId,
        watermark: i64,
    ) -> Result<Option<Watermark>, SliceError> {
        Ok(self.watermarks.update_unsequenced(origin, watermark)?)
    }

    /// Reports completion of `sequence` on `origin`, carrying a watermark for
    /// watermark elements.
    ///
    /// Returns the new global watermark if it advanced.
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::Watermark`] for unknown origins and duplicate
    /// completions.
    pub fn update_watermark_sequenced(
        &self,
        origin: OriginId,
        sequence: SequenceData,
        watermark: Option<i64>,
    ) -> Result<Option<Watermark>, SliceError> {
        Ok(self.watermarks.update(origin, sequence, watermark)?)
    }

    /// Records a watermark of `origin` and finalizes every slice it closes.
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::Watermark`] for unknown origins.
    pub fn advance_watermark(
        &self,
        origin: OriginId,
        watermark: i64,
    ) -> Result<Vec<SliceFinalized>, SliceError> {
        self.update_watermark(origin, watermark)?;
        Ok(self.finalize_pending())
    }

    /// Sequenced variant of [`advance_watermark`](Self::advance_watermark).
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::Watermark`] for unknown origins and duplicate
    /// completions.
    pub fn advance_watermark_sequenced(
        &self,
        origin: OriginId,
        sequence: SequenceData,
        watermark: Option<i64>,
    ) -> Result<Vec<SliceFinalized>, SliceError> {
        self.update_watermark_sequenced(origin, sequence, watermark)?;
        Ok(self.finalize_pending())
    }

    /// Marks `origin` idle and finalizes every slice the new watermark closes.
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::Watermark`] for unknown origins.
    pub fn mark_idle(&self, origin: OriginId) -> Result<Vec<SliceFinalized>, SliceError> {
        self.watermarks.mark_idle(origin)?;
        Ok(self.finalize_pending())
    }

    /// Finalizes every open slice with `end <= effective watermark`.
    ///
    /// Each slice is reported by exactly one call, in increasing end order.
    pub fn finalize_pending(&self) -> Vec<SliceFinalized> {
        let watermark = self.effective_watermark();
        if watermark.is_initial() {
            return Vec::new();
        }

        let index = self.index.read();
        let mut finalized = Vec::new();
        for slice in index.range(..=watermark.timestamp()).map(|(_, slice)| slice) {
            if slice.try_finalize() {
                self.open_slices.fetch_sub(1, Ordering::AcqRel);
                finalized.push(SliceFinalized {
                    id: slice.id(),
                    range: slice.range(),
                    watermark,
                });
            }
        }
        drop(index);

        if !finalized.is_empty() {
            self.counters
                .slices_finalized
                .fetch_add(finalized.len() as u64, Ordering::Relaxed);
            debug!(
                "Finalized {} slices at watermark {}",
                finalized.len(),
                watermark.timestamp()
            );
        }
        finalized
    }

    /// Finalizes every live slice regardless of watermarks.
    ///
    /// Used on graceful stop; every later record is rejected as late.
    pub fn finalize_all(&self) -> Vec<SliceFinalized> {
        self.forced_watermark.store(i64::MAX, Ordering::Release);
        self.finalize_pending()
    }

    /// Removes the slice with exactly this range and marks it disposed.
    ///
    /// Returns the removed slice; in-flight holders of the `Arc` keep reading it.
    pub fn dispose(&self, range: SliceRange) -> Option<Arc<Slice<S>>> {
        let mut index = self.index.write();
        if index.get(&range.end)?.range() != range {
            return None;
        }
        let slice = index.remove(&range.end)?;
        drop(index);

        if slice.mark_disposed() == SliceLifecycle::Open {
            self.open_slices.fetch_sub(1, Ordering::AcqRel);
        }
        self.counters.slices_disposed.fetch_add(1, Ordering::Relaxed);
        debug!("Disposed {} for {range}", slice.id());
        Some(slice)
    }

    /// Removes and disposes every slice. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.index.write());
        for slice in drained.values() {
            if slice.mark_disposed() == SliceLifecycle::Open {
                self.open_slices.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.counters
            .slices_disposed
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained.len()
    }

    /// Resolves a slice by identifier.
    #[must_use]
    pub fn get_slice(&self, id: SliceId) -> Option<Arc<Slice<S>>> {
        self.index
            .read()
            .values()
            .find(|slice| slice.id() == id)
            .cloned()
    }

    /// Resolves the live slice covering exactly `range`.
    #[must_use]
    pub fn slice_by_range(&self, range: SliceRange) -> Option<Arc<Slice<S>>> {
        self.index
            .read()
            .get(&range.end)
            .filter(|slice| slice.range() == range)
            .cloned()
    }

    /// Resolves a cached handle: the live slice with this range and identifier.
    #[must_use]
    pub fn resolve(&self, id: SliceId, range: SliceRange) -> Option<Arc<Slice<S>>> {
        self.index
            .read()
            .get(&range.end)
            .filter(|slice| slice.id() == id)
            .cloned()
    }

    /// Returns the live slices composing `window`, in increasing end order.
    #[must_use]
    pub fn slices_in(&self, window: WindowId) -> Vec<Arc<Slice<S>>> {
        if window.end <= window.start {
            return Vec::new();
        }
        self.index
            .read()
            .range(window.start.saturating_add(1)..=window.end)
            .map(|(_, slice)| slice)
            .filter(|slice| slice.start() >= window.start)
            .cloned()
            .collect()
    }

    /// Returns the number of live slices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns `true` if no slice is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Returns the number of open slices.
    #[must_use]
    pub fn open_slice_count(&self) -> usize {
        self.open_slices.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> SliceStoreMetrics {
        let c = &self.counters;
        SliceStoreMetrics {
            slices_created: c.slices_created.load(Ordering::Relaxed),
            slices_finalized: c.slices_finalized.load(Ordering::Relaxed),
            slices_disposed: c.slices_disposed.load(Ordering::Relaxed),
            late_records: c.late_records.load(Ordering::Relaxed),
            overflow_events: c.overflow_events.load(Ordering::Relaxed),
            forced_finalizations: c.forced_finalizations.load(Ordering::Relaxed),
        }
    }
}

impl<S, A: fmt::Debug> fmt::Debug for SliceStore<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceStore")
            .field("assigner", &self.assigner)
            .field("config", &self.config)
            .field("slices", &self.index.read().len())
            .field("open_slices", &self.open_slices.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl<S: Default, A: SliceAssigner> SliceStore<S, A> {
    /// Inserts an open slice over `range`, bypassing the assigner.
    pub(crate) fn insert_slice(&self, range: SliceRange) -> Arc<Slice<S>> {
        let id = SliceId(self.next_slice_id.fetch_add(1, Ordering::Relaxed));
        let slice = Arc::new(Slice::new(id, range, S::default()));
        self.index.write().insert(range.end, Arc::clone(&slice));
        self.open_slices.fetch_add(1, Ordering::AcqRel);
        slice
    }
}
