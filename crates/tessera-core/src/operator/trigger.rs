//! # Window Trigger Coordinator
//!
//! Decides when a window may be probed and when its slices may be disposed.
//!
//! ```text
//! Pending --(watermark >= end)--> ReadyToProbe --mark_scheduled--> Probed --on_probed--> Disposed
//! ```
//!
//! Windows are registered as their slices are finalized. Each finalized slice
//! carries a reference count equal to the number of registered windows it
//! belongs to; a slice is released for disposal once every one of those
//! windows was probed.
//!
//! The coordinator is single-threaded. Callers serialize finalization and
//! registration under one lock so events are observed in watermark order.

use std::collections::BTreeMap;
use std::fmt;

use fxhash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, warn};

use super::window::WindowId;
use crate::slice::{SliceFinalized, SliceRange};
use crate::time::Watermark;

/// Trigger state of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowState {
    /// Collecting finalized slices
    Pending,
    /// Watermark passed the window end; not yet handed to a prober
    ReadyToProbe,
    /// Handed to a prober
    Probed,
    /// Probe finished, slices released
    Disposed,
}

impl fmt::Display for WindowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowState::Pending => write!(f, "Pending"),
            WindowState::ReadyToProbe => write!(f, "ReadyToProbe"),
            WindowState::Probed => write!(f, "Probed"),
            WindowState::Disposed => write!(f, "Disposed"),
        }
    }
}

/// A window released for probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTask {
    /// Window to probe
    pub window: WindowId,
    /// Position of this trigger, starting at 1, increasing with window end
    pub trigger_sequence: u64,
    /// Watermark that released the window
    pub watermark: Watermark,
}

/// Counters of one coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerMetrics {
    /// Windows that received at least one slice
    pub windows_registered: u64,
    /// Windows handed out as probe tasks
    pub windows_triggered: u64,
    /// Windows whose probe completed
    pub windows_disposed: u64,
    /// Slices released for disposal
    pub slices_released: u64,
}

#[derive(Debug)]
struct WindowEntry {
    state: WindowState,
    slices: SmallVec<[SliceRange; 4]>,
}

/// Watermark-driven window trigger coordinator.
#[derive(Debug)]
pub struct WindowTriggerCoordinator {
    /// Keyed by `(end, start)` so iteration follows window end order
    windows: BTreeMap<(i64, i64), WindowEntry>,
    /// Remaining unprobed windows per finalized slice
    slice_refs: FxHashMap<SliceRange, usize>,
    next_trigger_sequence: u64,
    watermark: Watermark,
    metrics: TriggerMetrics,
}

impl WindowTriggerCoordinator {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: BTreeMap::new(),
            slice_refs: FxHashMap::default(),
            next_trigger_sequence: 1,
            watermark: Watermark::default(),
            metrics: TriggerMetrics::default(),
        }
    }

    /// Registers a finalized slice with the windows it belongs to.
    ///
    /// Returns the slice range if no registered window still needs it, in which
    /// case the caller disposes it immediately.
    pub fn on_slice_finalized(
        &mut self,
        event: &SliceFinalized,
        windows: &[WindowId],
    ) -> Option<SliceRange> {
        let mut refs = 0;
        for window in windows {
            let entry = self
                .windows
                .entry((window.end, window.start))
                .or_insert_with(|| {
                    self.metrics.windows_registered += 1;
                    WindowEntry {
                        state: WindowState::Pending,
                        slices: SmallVec::new(),
                    }
                });
            if entry.state == WindowState::Pending {
                entry.slices.push(event.range);
                refs += 1;
            } else {
                warn!(
                    "{} finalized after {window} was triggered ({})",
                    event.id, entry.state
                );
            }
        }

        if refs == 0 {
            return Some(event.range);
        }
        self.slice_refs.insert(event.range, refs);
        None
    }

    /// Releases every pending window with `end <= watermark`, in end order.
    ///
    /// Watermarks below the last observed one are ignored. Every window is
    /// returned by exactly one call.
    pub fn on_watermark(&mut self, watermark: Watermark) -> Vec<ProbeTask> {
        if watermark <= self.watermark {
            return Vec::new();
        }
        self.watermark = watermark;
        self.release(|(end, _)| end <= watermark.timestamp(), watermark)
    }

    /// Releases every pending window regardless of the watermark.
    ///
    /// Used on graceful stop.
    pub fn trigger_all(&mut self) -> Vec<ProbeTask> {
        let watermark = self.watermark;
        self.release(|_| true, watermark)
    }

    fn release(
        &mut self,
        due: impl Fn((i64, i64)) -> bool,
        watermark: Watermark,
    ) -> Vec<ProbeTask> {
        let mut tasks = Vec::new();
        for (&key, entry) in &mut self.windows {
            if !due(key) {
                break;
            }
            if entry.state != WindowState::Pending {
                continue;
            }
            entry.state = WindowState::ReadyToProbe;
            tasks.push(ProbeTask {
                window: WindowId::new(key.1, key.0),
                trigger_sequence: self.next_trigger_sequence,
                watermark,
            });
            self.next_trigger_sequence += 1;
        }

        if !tasks.is_empty() {
            self.metrics.windows_triggered += tasks.len() as u64;
            debug!(
                "Triggered {} windows at watermark {}",
                tasks.len(),
                watermark.timestamp()
            );
        }
        tasks
    }

    /// Moves a released window to `Probed`.
    ///
    /// Returns `false` if the window was not `ReadyToProbe`.
    pub fn mark_scheduled(&mut self, window: WindowId) -> bool {
        match self.windows.get_mut(&(window.end, window.start)) {
            Some(entry) if entry.state == WindowState::ReadyToProbe => {
                entry.state = WindowState::Probed;
                true
            }
            _ => false,
        }
    }

    /// Completes the probe of `window`.
    ///
    /// Returns the slices no other window needs anymore, or `None` if the
    /// window was not `Probed`.
    pub fn on_probed(&mut self, window: WindowId) -> Option<Vec<SliceRange>> {
        let entry = self.windows.get_mut(&(window.end, window.start))?;
        if entry.state != WindowState::Probed {
            return None;
        }
        entry.state = WindowState::Disposed;
        let slices = std::mem::take(&mut entry.slices);

        let mut released = Vec::new();
        for range in slices {
            if let Some(refs) = self.slice_refs.get_mut(&range) {
                *refs -= 1;
                if *refs == 0 {
                    self.slice_refs.remove(&range);
                    released.push(range);
                }
            }
        }

        self.metrics.windows_disposed += 1;
        self.metrics.slices_released += released.len() as u64;
        self.prune();
        Some(released)
    }

    /// Drops disposed windows from the front of the index.
    fn prune(&mut self) {
        while let Some(entry) = self.windows.first_entry() {
            if entry.get().state != WindowState::Disposed {
                break;
            }
            entry.remove();
        }
    }

    /// Returns the state of a tracked window.
    ///
    /// Windows are untracked before their first slice is finalized and after
    /// they and every earlier window were disposed.
    #[must_use]
    pub fn state(&self, window: WindowId) -> Option<WindowState> {
        self.windows
            .get(&(window.end, window.start))
            .map(|entry| entry.state)
    }

    /// Returns the number of tracked windows.
    #[must_use]
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Returns the number of windows not yet handed out.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.windows
            .values()
            .filter(|entry| entry.state == WindowState::Pending)
            .count()
    }

    /// Returns the last observed watermark.
    #[must_use]
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> TriggerMetrics {
        self.metrics
    }

    /// Forgets every window and slice reference. Returns the number of
    /// windows dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.windows.len();
        self.windows.clear();
        self.slice_refs.clear();
        dropped
    }
}

impl Default for WindowTriggerCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
