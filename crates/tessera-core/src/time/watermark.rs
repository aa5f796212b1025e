//! Multi-origin watermark tracking.
//!
//! [`WatermarkTracker`] keeps the latest watermark of every origin and the
//! combined (minimum) watermark. [`MultiOriginWatermarkProcessor`] puts a
//! [`Sequencer`] in front of it, so a watermark carried by sequence `n` of an
//! origin only takes effect once every earlier sequence of that origin has
//! completed.

use std::sync::atomic::{AtomicI64, Ordering};

use fxhash::FxHashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::{TimeError, Watermark};
use crate::sequence::{OriginId, SequenceData, Sequencer, DEFAULT_STALL_THRESHOLD};

/// Metrics for watermark tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatermarkMetrics {
    /// Current combined watermark timestamp
    pub current_watermark: i64,
    /// Number of per-origin watermarks that moved their origin forward
    pub updates_applied: u64,
    /// Number of per-origin watermarks ignored because they did not move forward
    pub stale_updates: u64,
    /// Number of combined watermark advances
    pub advances: u64,
}

impl WatermarkMetrics {
    /// Creates new metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_watermark: i64::MIN,
            ..Self::default()
        }
    }
}

/// Tracks watermarks across multiple origins.
///
/// The combined watermark is the minimum across active origins. Idle origins
/// do not hold it back; if every origin is idle the maximum is used. The
/// combined watermark never decreases.
///
/// # Example
///
/// ```rust
/// use tessera_core::sequence::OriginId;
/// use tessera_core::time::{WatermarkTracker, Watermark};
///
/// let mut tracker = WatermarkTracker::new([OriginId(0), OriginId(1)]);
/// tracker.update_origin(OriginId(0), 1000).unwrap();
/// tracker.update_origin(OriginId(1), 500).unwrap();
///
/// assert_eq!(tracker.current_watermark(), Some(Watermark::new(500)));
///
/// // Origin 1 goes idle, the combined watermark follows origin 0
/// tracker.mark_idle(OriginId(1)).unwrap();
/// assert_eq!(tracker.current_watermark(), Some(Watermark::new(1000)));
/// ```
#[derive(Debug)]
pub struct WatermarkTracker {
    /// Position of each origin in the per-origin vectors
    index: FxHashMap<OriginId, usize>,
    /// Watermark for each origin
    origin_watermarks: Vec<i64>,
    /// Idle status for each origin
    idle_origins: Vec<bool>,
    /// Combined minimum watermark
    combined_watermark: i64,
    metrics: WatermarkMetrics,
}

impl WatermarkTracker {
    /// Creates a tracker for the given origins.
    #[must_use]
    pub fn new(origins: impl IntoIterator<Item = OriginId>) -> Self {
        let mut index = FxHashMap::default();
        for origin in origins {
            let next = index.len();
            index.entry(origin).or_insert(next);
        }
        let count = index.len();
        Self {
            index,
            origin_watermarks: vec![i64::MIN; count],
            idle_origins: vec![false; count],
            combined_watermark: i64::MIN,
            metrics: WatermarkMetrics::new(),
        }
    }

    fn slot(&self, origin: OriginId) -> Result<usize, TimeError> {
        self.index
            .get(&origin)
            .copied()
            .ok_or(TimeError::UnknownOrigin(origin))
    }

    /// Updates the watermark of an origin.
    ///
    /// Returns `Some(Watermark)` if the combined watermark advances.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::UnknownOrigin`] for unregistered origins.
    pub fn update_origin(
        &mut self,
        origin: OriginId,
        watermark: i64,
    ) -> Result<Option<Watermark>, TimeError> {
        let slot = self.slot(origin)?;
        self.idle_origins[slot] = false;

        if watermark > self.origin_watermarks[slot] {
            self.origin_watermarks[slot] = watermark;
            self.metrics.updates_applied += 1;
            Ok(self.update_combined())
        } else {
            self.metrics.stale_updates += 1;
            Ok(None)
        }
    }

    /// Marks an origin as idle, excluding it from the combined watermark.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::UnknownOrigin`] for unregistered origins.
    pub fn mark_idle(&mut self, origin: OriginId) -> Result<Option<Watermark>, TimeError> {
        let slot = self.slot(origin)?;
        self.idle_origins[slot] = true;
        Ok(self.update_combined())
    }

    /// Returns the current combined watermark, `None` before any progress.
    #[must_use]
    pub fn current_watermark(&self) -> Option<Watermark> {
        if self.combined_watermark == i64::MIN {
            None
        } else {
            Some(Watermark::new(self.combined_watermark))
        }
    }

    /// Returns the watermark of one origin.
    #[must_use]
    pub fn origin_watermark(&self, origin: OriginId) -> Option<i64> {
        self.index
            .get(&origin)
            .map(|&slot| self.origin_watermarks[slot])
    }

    /// Returns whether an origin is marked as idle.
    #[must_use]
    pub fn is_idle(&self, origin: OriginId) -> bool {
        self.index
            .get(&origin)
            .is_some_and(|&slot| self.idle_origins[slot])
    }

    /// Returns `true` if the origin is registered.
    #[must_use]
    pub fn contains(&self, origin: OriginId) -> bool {
        self.index.contains_key(&origin)
    }

    /// Returns the number of origins being tracked.
    #[must_use]
    pub fn num_origins(&self) -> usize {
        self.origin_watermarks.len()
    }

    /// Returns the number of active (non-idle) origins.
    #[must_use]
    pub fn active_origin_count(&self) -> usize {
        self.idle_origins.iter().filter(|&&idle| !idle).count()
    }

    /// Returns the tracker metrics.
    #[must_use]
    pub fn metrics(&self) -> WatermarkMetrics {
        self.metrics
    }

    fn update_combined(&mut self) -> Option<Watermark> {
        let active = self
            .origin_watermarks
            .iter()
            .zip(&self.idle_origins)
            .filter(|(_, idle)| !**idle)
            .map(|(wm, _)| *wm)
            .min();

        // All origins idle: follow the most advanced one
        let candidate = match active {
            Some(min) => min,
            None => self
                .origin_watermarks
                .iter()
                .copied()
                .max()
                .unwrap_or(i64::MIN),
        };

        if candidate > self.combined_watermark {
            self.combined_watermark = candidate;
            self.metrics.current_watermark = candidate;
            self.metrics.advances += 1;
            Some(Watermark::new(candidate))
        } else {
            None
        }
    }
}

/// Applies per-origin watermarks in sequence order and exposes the global one.
///
/// Every element an origin delivers (records or watermark) completes one
/// sequence position. Callers report completions with [`update`](Self::update),
/// passing the watermark for watermark elements and `None` for record buffers.
/// The global watermark is readable without locking.
#[derive(Debug)]
pub struct MultiOriginWatermarkProcessor {
    tracker: Mutex<WatermarkTracker>,
    completions: Sequencer<Option<i64>>,
    current: AtomicI64,
}

impl MultiOriginWatermarkProcessor {
    /// Creates a processor for the given origins.
    #[must_use]
    pub fn new(origins: impl IntoIterator<Item = OriginId>) -> Self {
        Self::with_stall_threshold(origins, DEFAULT_STALL_THRESHOLD)
    }

    /// Creates a processor with a custom completion stall threshold.
    #[must_use]
    pub fn with_stall_threshold(
        origins: impl IntoIterator<Item = OriginId>,
        stall_threshold: usize,
    ) -> Self {
        Self {
            tracker: Mutex::new(WatermarkTracker::new(origins)),
            completions: Sequencer::with_stall_threshold(stall_threshold),
            current: AtomicI64::new(i64::MIN),
        }
    }

    /// Reports completion of `sequence` on `origin`.
    ///
    /// Returns `Some(Watermark)` if the global watermark advanced.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::UnknownOrigin`] for unregistered origins and
    /// [`TimeError::Sequence`] for duplicate or invalid completions.
    pub fn update(
        &self,
        origin: OriginId,
        sequence: SequenceData,
        watermark: Option<i64>,
    ) -> Result<Option<Watermark>, TimeError> {
        let mut tracker = self.tracker.lock();
        if !tracker.contains(origin) {
            return Err(TimeError::UnknownOrigin(origin));
        }

        let released = self.completions.admit(origin, sequence, watermark)?;
        let mut advanced = None;
        for watermark in released.into_iter().flatten() {
            if let Some(wm) = tracker.update_origin(origin, watermark)? {
                advanced = Some(wm);
            }
        }

        if let Some(wm) = advanced {
            self.current.store(wm.timestamp(), Ordering::Release);
            debug!("Global watermark advanced to {} by {origin}", wm.timestamp());
        }
        Ok(advanced)
    }

    /// Applies a watermark of `origin` immediately, bypassing sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::UnknownOrigin`] for unregistered origins.
    pub fn update_unsequenced(
        &self,
        origin: OriginId,
        watermark: i64,
    ) -> Result<Option<Watermark>, TimeError> {
        let mut tracker = self.tracker.lock();
        let advanced = tracker.update_origin(origin, watermark)?;
        if let Some(wm) = advanced {
            self.current.store(wm.timestamp(), Ordering::Release);
        }
        Ok(advanced)
    }

    /// Marks an origin idle so it no longer holds back the global watermark.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::UnknownOrigin`] for unregistered origins.
    pub fn mark_idle(&self, origin: OriginId) -> Result<Option<Watermark>, TimeError> {
        let mut tracker = self.tracker.lock();
        let advanced = tracker.mark_idle(origin)?;
        if let Some(wm) = advanced {
            self.current.store(wm.timestamp(), Ordering::Release);
        }
        Ok(advanced)
    }

    /// Returns the global watermark (`i64::MIN` before any progress).
    #[inline]
    #[must_use]
    pub fn watermark(&self) -> Watermark {
        Watermark::new(self.current.load(Ordering::Acquire))
    }

    /// Returns the global watermark, `None` before any progress.
    #[must_use]
    pub fn current_watermark(&self) -> Option<Watermark> {
        let wm = self.watermark();
        (!wm.is_initial()).then_some(wm)
    }

    /// Returns the watermark of one origin.
    #[must_use]
    pub fn origin_watermark(&self, origin: OriginId) -> Option<i64> {
        self.tracker.lock().origin_watermark(origin)
    }

    /// Returns the number of completions buffered behind a gap for `origin`.
    #[must_use]
    pub fn pending(&self, origin: OriginId) -> usize {
        self.completions.pending(origin)
    }

    /// Returns origins with at least `threshold` buffered completions.
    #[must_use]
    pub fn stalled_origins(&self, threshold: usize) -> Vec<OriginId> {
        self.completions.stalled_origins(threshold)
    }

    /// Returns the tracker metrics.
    #[must_use]
    pub fn metrics(&self) -> WatermarkMetrics {
        self.tracker.lock().metrics()
    }
}
