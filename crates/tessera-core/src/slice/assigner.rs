//! Slice assignment.
//!
//! Slices are the coarsest ranges that never straddle a window boundary. For
//! a sliding window of size `S` and slide `L`, window boundaries are the
//! points `k * L` (window starts) and `k * L + S` (window ends); a slice
//! spans from the closest boundary at or below a timestamp to the closest
//! boundary above it.
//!
//! ```text
//! size 1000, slide 400
//!
//! starts:  0     400     800    1200
//! ends:       200     600    1000    1400
//! slices: [0,200) [200,400) [400,600) [600,800) [800,1000) ...
//! ```
//!
//! For tumbling windows both grids coincide and every slice is one window.
//!
//! Timestamps whose windows do not fit in `i64` have no slice.

use crate::config::{ConfigError, WindowType};
use crate::operator::window::{
    SlidingWindowAssigner, TumblingWindowAssigner, WindowAssigner, WindowIdVec,
};

use super::SliceRange;

/// Maps timestamps to slices and slices to windows.
pub trait SliceAssigner: WindowAssigner {
    /// Returns the slice range containing `timestamp`, or `None` if a window
    /// containing it does not fit in `i64`.
    fn slice_range(&self, timestamp: i64) -> Option<SliceRange>;

    /// Returns every window composed (partly) of the slice `range`.
    ///
    /// A slice never crosses a window boundary, so the windows containing its
    /// start are exactly the windows containing the whole slice.
    fn windows_of_slice(&self, range: SliceRange) -> WindowIdVec {
        self.assign_windows(range.start).unwrap_or_default()
    }
}

impl SliceAssigner for TumblingWindowAssigner {
    #[inline]
    fn slice_range(&self, timestamp: i64) -> Option<SliceRange> {
        let window = self.assign(timestamp)?;
        Some(SliceRange::new(window.start, window.end))
    }
}

impl SliceAssigner for SlidingWindowAssigner {
    #[inline]
    fn slice_range(&self, timestamp: i64) -> Option<SliceRange> {
        let slide = self.slide_ms();
        let size = self.size_ms();
        let (_, prev_start) = self.start_bounds(timestamp)?;

        // Closest window start and closest window end at or below the timestamp
        let end_offset = (timestamp.rem_euclid(slide) - size.rem_euclid(slide)).rem_euclid(slide);
        let prev_end = timestamp.checked_sub(end_offset)?;

        Some(SliceRange::new(
            prev_start.max(prev_end),
            prev_start.min(prev_end).checked_add(slide)?,
        ))
    }
}

/// Time-based window assigner selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindowAssigner {
    /// Fixed, non-overlapping windows
    Tumbling(TumblingWindowAssigner),
    /// Overlapping windows
    Sliding(SlidingWindowAssigner),
}

impl TimeWindowAssigner {
    /// Builds the assigner for a window definition.
    ///
    /// Only time-based windows can be sliced ahead of time. Session windows
    /// close on a gap in the data and threshold windows on a predicate, so
    /// their bounds are unknown when a record arrives. Both are accepted by
    /// [`WindowType`] for configuration parsing but rejected here.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedWindow`] for session and threshold
    /// windows and [`ConfigError::InvalidWindow`] for invalid parameters.
    pub fn from_window_type(window: &WindowType) -> Result<Self, ConfigError> {
        match window {
            WindowType::Tumbling { size_ms } => Ok(Self::Tumbling(
                TumblingWindowAssigner::try_from_millis(*size_ms)?,
            )),
            // A slide equal to the size is a tumbling window
            WindowType::Sliding { size_ms, slide_ms } if size_ms == slide_ms => Ok(
                Self::Tumbling(TumblingWindowAssigner::try_from_millis(*size_ms)?),
            ),
            WindowType::Sliding { size_ms, slide_ms } => Ok(Self::Sliding(
                SlidingWindowAssigner::try_from_millis(*size_ms, *slide_ms)?,
            )),
            WindowType::Session { .. } | WindowType::Threshold { .. } => {
                Err(ConfigError::UnsupportedWindow(window.to_string()))
            }
        }
    }
}

impl WindowAssigner for TimeWindowAssigner {
    #[inline]
    fn assign_windows(&self, timestamp: i64) -> Option<WindowIdVec> {
        match self {
            Self::Tumbling(assigner) => assigner.assign_windows(timestamp),
            Self::Sliding(assigner) => assigner.assign_windows(timestamp),
        }
    }

    fn size_ms(&self) -> i64 {
        match self {
            Self::Tumbling(assigner) => assigner.size_ms(),
            Self::Sliding(assigner) => assigner.size_ms(),
        }
    }
}

impl SliceAssigner for TimeWindowAssigner {
    #[inline]
    fn slice_range(&self, timestamp: i64) -> Option<SliceRange> {
        match self {
            Self::Tumbling(assigner) => assigner.slice_range(timestamp),
            Self::Sliding(assigner) => assigner.slice_range(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::window::WindowId;

    #[test]
    fn test_tumbling_slice_is_window() {
        let assigner = TumblingWindowAssigner::from_millis(1000);
        assert_eq!(assigner.slice_range(100), Some(SliceRange::new(0, 1000)));
        assert_eq!(assigner.slice_range(-1), Some(SliceRange::new(-1000, 0)));
        assert_eq!(
            assigner
                .windows_of_slice(SliceRange::new(0, 1000))
                .as_slice(),
            &[WindowId::new(0, 1000)]
        );
    }

    #[test]
    fn test_sliding_slices_follow_both_grids() {
        let assigner = SlidingWindowAssigner::from_millis(1000, 400);
        assert_eq!(assigner.slice_range(0), Some(SliceRange::new(0, 200)));
        assert_eq!(assigner.slice_range(199), Some(SliceRange::new(0, 200)));
        assert_eq!(assigner.slice_range(200), Some(SliceRange::new(200, 400)));
        assert_eq!(assigner.slice_range(950), Some(SliceRange::new(800, 1000)));
        assert_eq!(assigner.slice_range(1000), Some(SliceRange::new(1000, 1200)));
        assert_eq!(assigner.slice_range(-50), Some(SliceRange::new(-200, 0)));
    }

    #[test]
    fn test_sliding_even_slide() {
        let assigner = SlidingWindowAssigner::from_millis(1000, 500);
        assert_eq!(assigner.slice_range(1200), Some(SliceRange::new(1000, 1500)));
        assert_eq!(
            assigner
                .windows_of_slice(SliceRange::new(1000, 1500))
                .as_slice(),
            &[WindowId::new(500, 1500), WindowId::new(1000, 2000)]
        );
    }

    #[test]
    fn test_sliding_slices_tile_the_timeline() {
        let assigner = SlidingWindowAssigner::from_millis(700, 300);
        let mut ts = -2000;
        while ts < 2000 {
            let range = assigner.slice_range(ts).unwrap();
            assert!(range.contains(ts), "{range} does not contain {ts}");
            // The slice lies inside every window containing its start
            for window in assigner.windows_of_slice(range) {
                assert!(window.covers(range.start, range.end));
            }
            // Consecutive slices are contiguous
            assert_eq!(assigner.slice_range(range.end).unwrap().start, range.end);
            ts = range.end;
        }
    }

    #[test]
    fn test_from_window_type() {
        assert!(matches!(
            TimeWindowAssigner::from_window_type(&WindowType::tumbling(10)),
            Ok(TimeWindowAssigner::Tumbling(_))
        ));
        assert!(matches!(
            TimeWindowAssigner::from_window_type(&WindowType::sliding(10, 10)),
            Ok(TimeWindowAssigner::Tumbling(_))
        ));
        assert!(matches!(
            TimeWindowAssigner::from_window_type(&WindowType::sliding(10, 5)),
            Ok(TimeWindowAssigner::Sliding(_))
        ));
        assert!(matches!(
            TimeWindowAssigner::from_window_type(&WindowType::Session { gap_ms: 5 }),
            Err(ConfigError::UnsupportedWindow(_))
        ));
        assert!(matches!(
            TimeWindowAssigner::from_window_type(&WindowType::tumbling(0)),
            Err(ConfigError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_no_slice_at_i64_limits() {
        let tumbling = TumblingWindowAssigner::from_millis(1000);
        assert_eq!(tumbling.slice_range(i64::MAX - 5), None);
        assert_eq!(tumbling.slice_range(i64::MIN + 5), None);

        let sliding = SlidingWindowAssigner::from_millis(1000, 500);
        assert_eq!(sliding.slice_range(i64::MAX - 5), None);
        assert_eq!(sliding.slice_range(i64::MIN + 5), None);
        assert_eq!(sliding.slice_range(i64::MIN), None);

        // Far from the limits the remainder form matches the direct one
        let sliding = SlidingWindowAssigner::from_millis(1000, 400);
        assert_eq!(
            sliding.slice_range(-1_000_000_050),
            Some(SliceRange::new(-1_000_000_200, -1_000_000_000))
        );
    }
}
