//! # Window Assignment
//!
//! Time-based window definitions used by windowed operators.
//!
//! - [`TumblingWindowAssigner`]: fixed, non-overlapping windows
//! - [`SlidingWindowAssigner`]: fixed-size windows advancing by a slide
//!
//! ```text
//! Window size: 1000ms, Slide: 500ms
//!
//! Window 1: [   0, 1000)
//! Window 2: [ 500, 1500)
//! Window 3: [1000, 2000)
//!
//! An event at 1200 belongs to windows 2 and 3
//! ```
//!
//! Windows are aligned to epoch (timestamp 0). Negative timestamps are floored
//! onto the same grid, so windows may start before 0. Timestamps whose windows
//! would start or end outside the `i64` range have no windows.

use smallvec::SmallVec;

use crate::config::ConfigError;

/// A window as its half-open time range `[start, end)` in milliseconds.
///
/// Ordering is by start, then end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowId {
    /// First timestamp in the window
    pub start: i64,
    /// First timestamp after the window
    pub end: i64,
}

impl WindowId {
    /// Creates the window `[start, end)`.
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Returns `true` if `[start, end)` lies inside this window.
    #[inline]
    #[must_use]
    pub fn covers(&self, start: i64, end: i64) -> bool {
        self.start <= start && end <= self.end
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Windows of one timestamp; inline up to `size / slide <= 4`.
pub type WindowIdVec = SmallVec<[WindowId; 4]>;

/// Floor of `timestamp` onto a grid of `step`, `None` below `i64::MIN`.
#[inline]
pub(crate) fn floor_to(timestamp: i64, step: i64) -> Option<i64> {
    timestamp.checked_sub(timestamp.rem_euclid(step))
}

/// Maps timestamps to the windows containing them.
pub trait WindowAssigner: Send + Sync {
    /// Returns every window containing `timestamp`, ordered by start.
    ///
    /// Returns `None` if a window bound does not fit in `i64`.
    fn assign_windows(&self, timestamp: i64) -> Option<WindowIdVec>;

    /// Returns the window size in milliseconds.
    fn size_ms(&self) -> i64;
}

/// Non-overlapping windows of a fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumblingWindowAssigner {
    size_ms: i64,
}

impl TumblingWindowAssigner {
    /// Creates the assigner for windows of `size_ms`.
    ///
    /// # Panics
    ///
    /// Panics unless `size_ms` is positive.
    #[must_use]
    pub fn from_millis(size_ms: i64) -> Self {
        assert!(size_ms > 0, "tumbling window size must be positive");
        Self { size_ms }
    }

    /// Fallible variant of [`from_millis`](Self::from_millis).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidWindow`] if the size is zero or negative.
    pub fn try_from_millis(size_ms: i64) -> Result<Self, ConfigError> {
        if size_ms <= 0 {
            return Err(ConfigError::InvalidWindow(format!(
                "window size must be positive, got {size_ms}"
            )));
        }
        Ok(Self { size_ms })
    }

    /// Returns the single window containing `timestamp`, or `None` if its
    /// bounds do not fit in `i64`.
    #[inline]
    #[must_use]
    pub fn assign(&self, timestamp: i64) -> Option<WindowId> {
        let start = floor_to(timestamp, self.size_ms)?;
        Some(WindowId::new(start, start.checked_add(self.size_ms)?))
    }
}

impl WindowAssigner for TumblingWindowAssigner {
    #[inline]
    fn assign_windows(&self, timestamp: i64) -> Option<WindowIdVec> {
        self.assign(timestamp).map(|window| smallvec::smallvec![window])
    }

    fn size_ms(&self) -> i64 {
        self.size_ms
    }
}

/// Windows of a fixed size starting every `slide_ms`.
///
/// A timestamp belongs to `ceil(size / slide)` windows (fewer at grid edges
/// when the slide does not divide the size).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowAssigner {
    size_ms: i64,
    slide_ms: i64,
}

impl SlidingWindowAssigner {
    /// Creates the assigner for windows of `size_ms` every `slide_ms`.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < slide_ms <= size_ms`.
    #[must_use]
    pub fn from_millis(size_ms: i64, slide_ms: i64) -> Self {
        assert!(
            slide_ms > 0 && slide_ms <= size_ms,
            "sliding window needs 0 < slide <= size, got size={size_ms} slide={slide_ms}"
        );
        Self { size_ms, slide_ms }
    }

    /// Fallible variant of [`from_millis`](Self::from_millis).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidWindow`] unless `0 < slide_ms <= size_ms`.
    pub fn try_from_millis(size_ms: i64, slide_ms: i64) -> Result<Self, ConfigError> {
        if size_ms <= 0 || slide_ms <= 0 {
            return Err(ConfigError::InvalidWindow(format!(
                "window size and slide must be positive, got size={size_ms} slide={slide_ms}"
            )));
        }
        if slide_ms > size_ms {
            return Err(ConfigError::InvalidWindow(format!(
                "slide {slide_ms} exceeds window size {size_ms}"
            )));
        }
        Ok(Self { size_ms, slide_ms })
    }

    /// Returns the slide in milliseconds.
    #[must_use]
    pub fn slide_ms(&self) -> i64 {
        self.slide_ms
    }

    /// Earliest and latest start of a window containing `timestamp`, if the
    /// windows between them all fit in `i64`.
    pub(crate) fn start_bounds(&self, timestamp: i64) -> Option<(i64, i64)> {
        let latest = floor_to(timestamp, self.slide_ms)?;
        let span = floor_to(self.size_ms - 1, self.slide_ms)?;
        let earliest = latest.checked_sub(span)?;
        latest.checked_add(self.size_ms)?;
        Some((earliest, latest))
    }
}

impl WindowAssigner for SlidingWindowAssigner {
    #[inline]
    fn assign_windows(&self, timestamp: i64) -> Option<WindowIdVec> {
        let (earliest, latest) = self.start_bounds(timestamp)?;
        let windows: WindowIdVec = std::iter::successors(Some(earliest), |start| {
            start.checked_add(self.slide_ms)
        })
        .take_while(|&start| start <= latest)
        .filter(|&start| start + self.size_ms > timestamp)
        .map(|start| WindowId::new(start, start + self.size_ms))
        .collect();
        Some(windows)
    }

    fn size_ms(&self) -> i64 {
        self.size_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_id_display_and_cover() {
        let window = WindowId::new(1000, 2000);
        assert_eq!(window.to_string(), "[1000, 2000)");
        assert!(window.covers(1000, 2000));
        assert!(window.covers(1500, 1600));
        assert!(!window.covers(900, 1100));
    }

    #[test]
    fn test_tumbling_assignment() {
        let assigner = TumblingWindowAssigner::from_millis(1000);
        assert_eq!(assigner.assign(0), Some(WindowId::new(0, 1000)));
        assert_eq!(assigner.assign(999), Some(WindowId::new(0, 1000)));
        assert_eq!(assigner.assign(1000), Some(WindowId::new(1000, 2000)));
        assert_eq!(assigner.assign(-1), Some(WindowId::new(-1000, 0)));
        assert_eq!(assigner.assign(-1000), Some(WindowId::new(-1000, 0)));
    }

    #[test]
    fn test_tumbling_rejects_non_positive() {
        assert!(TumblingWindowAssigner::try_from_millis(0).is_err());
        assert!(TumblingWindowAssigner::try_from_millis(-5).is_err());
    }

    #[test]
    fn test_sliding_assignment() {
        let assigner = SlidingWindowAssigner::from_millis(1000, 500);

        let windows = assigner.assign_windows(1200).unwrap();
        assert_eq!(
            windows.as_slice(),
            &[WindowId::new(500, 1500), WindowId::new(1000, 2000)]
        );

        let windows = assigner.assign_windows(100).unwrap();
        assert_eq!(
            windows.as_slice(),
            &[WindowId::new(-500, 500), WindowId::new(0, 1000)]
        );
    }

    #[test]
    fn test_sliding_uneven_slide() {
        let assigner = SlidingWindowAssigner::from_millis(1000, 300);
        let windows = assigner.assign_windows(950).unwrap();
        // Starts 0, 300, 600, 900 all contain 950
        assert_eq!(windows.len(), 4);
        assert!(windows.iter().all(|w| w.start <= 950 && 950 < w.end));
    }

    #[test]
    fn test_sliding_rejects_invalid() {
        assert!(SlidingWindowAssigner::try_from_millis(1000, 0).is_err());
        assert!(SlidingWindowAssigner::try_from_millis(1000, 1500).is_err());
        assert!(SlidingWindowAssigner::try_from_millis(1000, 1000).is_ok());
    }

    #[test]
    fn test_windows_at_i64_limits() {
        let tumbling = TumblingWindowAssigner::from_millis(1000);
        assert_eq!(tumbling.assign(i64::MAX - 5), None);
        assert_eq!(tumbling.assign(i64::MIN + 5), None);
        assert!(tumbling.assign_windows(i64::MAX).is_none());

        let sliding = SlidingWindowAssigner::from_millis(1000, 500);
        assert!(sliding.assign_windows(i64::MAX - 5).is_none());
        assert!(sliding.assign_windows(i64::MIN + 5).is_none());

        // Last representable tumbling window
        let last = i64::MAX - 1000 - i64::MAX.rem_euclid(1000);
        assert_eq!(tumbling.assign(last), Some(WindowId::new(last, last + 1000)));
    }
}
