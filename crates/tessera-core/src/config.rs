//! # Configuration
//!
//! Option types shared by the slice store, the slice cache and the stream-join
//! operator. Loading configuration from files or flags happens elsewhere; this
//! module only defines the values and validates them.

use std::fmt;
use std::str::FromStr;

use crate::sequence::OriginId;

/// Default number of entries in a slice cache.
pub const DEFAULT_SLICE_CACHE_ENTRIES: usize = 10;

/// Slice cache replacement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SliceCacheType {
    /// No cache; every lookup goes to the slice store
    #[default]
    None,
    /// Probation FIFO plus protected LRU
    TwoQueues,
    /// Least recently used
    Lru,
    /// First in, first out
    Fifo,
    /// FIFO with a reference bit
    SecondChance,
}

impl fmt::Display for SliceCacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceCacheType::None => write!(f, "NONE"),
            SliceCacheType::TwoQueues => write!(f, "TWO_QUEUES"),
            SliceCacheType::Lru => write!(f, "LRU"),
            SliceCacheType::Fifo => write!(f, "FIFO"),
            SliceCacheType::SecondChance => write!(f, "SECOND_CHANCE"),
        }
    }
}

impl FromStr for SliceCacheType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "NONE" => Ok(Self::None),
            "TWO_QUEUES" | "TWOQUEUES" | "2Q" => Ok(Self::TwoQueues),
            "LRU" => Ok(Self::Lru),
            "FIFO" => Ok(Self::Fifo),
            "SECOND_CHANCE" | "SECONDCHANCE" | "CLOCK" => Ok(Self::SecondChance),
            _ => Err(format!("Unknown slice cache type: {s}")),
        }
    }
}

/// Slice cache options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceCacheConfig {
    /// Replacement policy
    pub cache_type: SliceCacheType,
    /// Number of cached slice handles per worker
    pub number_of_entries: usize,
}

impl SliceCacheConfig {
    /// Creates cache options.
    #[must_use]
    pub fn new(cache_type: SliceCacheType, number_of_entries: usize) -> Self {
        Self {
            cache_type,
            number_of_entries,
        }
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCacheCapacity`] if the capacity is below
    /// what the policy needs: one entry, or two for [`SliceCacheType::TwoQueues`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let minimum = match self.cache_type {
            SliceCacheType::None => return Ok(()),
            SliceCacheType::TwoQueues => 2,
            SliceCacheType::Lru | SliceCacheType::Fifo | SliceCacheType::SecondChance => 1,
        };
        if self.number_of_entries < minimum {
            return Err(ConfigError::InvalidCacheCapacity {
                cache_type: self.cache_type,
                capacity: self.number_of_entries,
                minimum,
            });
        }
        Ok(())
    }
}

impl Default for SliceCacheConfig {
    fn default() -> Self {
        Self::new(SliceCacheType::None, DEFAULT_SLICE_CACHE_ENTRIES)
    }
}

/// Window definition of a windowed operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowType {
    /// Fixed, non-overlapping windows
    Tumbling {
        /// Window size in milliseconds
        size_ms: i64,
    },
    /// Fixed-size windows advancing by `slide_ms`
    Sliding {
        /// Window size in milliseconds
        size_ms: i64,
        /// Slide in milliseconds
        slide_ms: i64,
    },
    /// Activity windows closed after `gap_ms` of inactivity
    Session {
        /// Inactivity gap in milliseconds
        gap_ms: i64,
    },
    /// Windows open while a predicate holds
    Threshold {
        /// Predicate column
        column: String,
        /// Minimum number of records for a window to be emitted
        min_count: u64,
    },
}

impl WindowType {
    /// Tumbling window of `size_ms`.
    #[must_use]
    pub fn tumbling(size_ms: i64) -> Self {
        Self::Tumbling { size_ms }
    }

    /// Sliding window of `size_ms` advancing by `slide_ms`.
    #[must_use]
    pub fn sliding(size_ms: i64, slide_ms: i64) -> Self {
        Self::Sliding { size_ms, slide_ms }
    }

    /// Returns the window kind name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            WindowType::Tumbling { .. } => "TUMBLING",
            WindowType::Sliding { .. } => "SLIDING",
            WindowType::Session { .. } => "SESSION",
            WindowType::Threshold { .. } => "THRESHOLD",
        }
    }

    /// Returns `true` for windows whose bounds depend only on time.
    #[must_use]
    pub fn is_time_based(&self) -> bool {
        matches!(self, WindowType::Tumbling { .. } | WindowType::Sliding { .. })
    }

    /// Validates window parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidWindow`] for non-positive sizes or a
    /// slide larger than the window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            WindowType::Tumbling { size_ms } if *size_ms <= 0 => Err(
                ConfigError::InvalidWindow(format!("window size must be positive, got {size_ms}")),
            ),
            WindowType::Sliding { size_ms, slide_ms } if *size_ms <= 0 || *slide_ms <= 0 => {
                Err(ConfigError::InvalidWindow(format!(
                    "window size and slide must be positive, got size={size_ms} slide={slide_ms}"
                )))
            }
            WindowType::Sliding { size_ms, slide_ms } if slide_ms > size_ms => {
                Err(ConfigError::InvalidWindow(format!(
                    "slide {slide_ms} exceeds window size {size_ms}"
                )))
            }
            WindowType::Session { gap_ms } if *gap_ms <= 0 => Err(ConfigError::InvalidWindow(
                format!("session gap must be positive, got {gap_ms}"),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowType::Tumbling { size_ms } => write!(f, "TUMBLING({size_ms}ms)"),
            WindowType::Sliding { size_ms, slide_ms } => {
                write!(f, "SLIDING({size_ms}ms, {slide_ms}ms)")
            }
            WindowType::Session { gap_ms } => write!(f, "SESSION({gap_ms}ms)"),
            WindowType::Threshold { column, min_count } => {
                write!(f, "THRESHOLD({column}, {min_count})")
            }
        }
    }
}

/// Order in which probe results are released downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitOrdering {
    /// Release in increasing window end order
    #[default]
    WindowEnd,
    /// Release as soon as a probe completes
    Unordered,
}

impl fmt::Display for EmitOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitOrdering::WindowEnd => write!(f, "window_end"),
            EmitOrdering::Unordered => write!(f, "unordered"),
        }
    }
}

impl FromStr for EmitOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "window_end" | "windowend" | "ordered" => Ok(Self::WindowEnd),
            "unordered" | "any" => Ok(Self::Unordered),
            _ => Err(format!("Unknown emit ordering: {s}")),
        }
    }
}

/// Behavior when the number of open slices exceeds the configured cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Log a warning and keep accepting records
    #[default]
    Warn,
    /// Finalize the oldest open slice early
    ForceFinalize,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Warn => write!(f, "warn"),
            OverflowPolicy::ForceFinalize => write!(f, "force_finalize"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "force_finalize" | "forcefinalize" | "force" => Ok(Self::ForceFinalize),
            _ => Err(format!("Unknown overflow policy: {s}")),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Window kind the operator cannot evaluate
    #[error("Unsupported window type {0}: stream joins require time-based windows")]
    UnsupportedWindow(String),

    /// Invalid window parameters
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// Cache capacity below the policy minimum
    #[error("Slice cache {cache_type} needs at least {minimum} entries, got {capacity}")]
    InvalidCacheCapacity {
        /// Configured policy
        cache_type: SliceCacheType,
        /// Configured capacity
        capacity: usize,
        /// Minimum capacity of the policy
        minimum: usize,
    },

    /// A join side has no upstream origins
    #[error("No origins configured for the {0} side")]
    NoOrigins(&'static str),

    /// The same origin feeds both join sides
    #[error("{0} is configured on both join sides")]
    OverlappingOrigins(OriginId),

    /// Schema does not match the configured columns
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Any other invalid value
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue {
        /// Option name
        name: &'static str,
        /// What is wrong
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_cache_type_from_str() {
        assert_eq!("lru".parse::<SliceCacheType>().unwrap(), SliceCacheType::Lru);
        assert_eq!(
            "TWO_QUEUES".parse::<SliceCacheType>().unwrap(),
            SliceCacheType::TwoQueues
        );
        assert_eq!(
            "second-chance".parse::<SliceCacheType>().unwrap(),
            SliceCacheType::SecondChance
        );
        assert_eq!("none".parse::<SliceCacheType>().unwrap(), SliceCacheType::None);
        assert!("random".parse::<SliceCacheType>().is_err());
    }

    #[test]
    fn test_slice_cache_type_display_round_trips() {
        for cache_type in [
            SliceCacheType::None,
            SliceCacheType::TwoQueues,
            SliceCacheType::Lru,
            SliceCacheType::Fifo,
            SliceCacheType::SecondChance,
        ] {
            assert_eq!(
                cache_type.to_string().parse::<SliceCacheType>().unwrap(),
                cache_type
            );
        }
    }

    #[test]
    fn test_cache_capacity_validation() {
        assert!(SliceCacheConfig::new(SliceCacheType::None, 0).validate().is_ok());
        assert!(SliceCacheConfig::new(SliceCacheType::Lru, 0).validate().is_err());
        assert!(SliceCacheConfig::new(SliceCacheType::Fifo, 1).validate().is_ok());
        assert!(matches!(
            SliceCacheConfig::new(SliceCacheType::TwoQueues, 1).validate(),
            Err(ConfigError::InvalidCacheCapacity { minimum: 2, .. })
        ));
        assert!(SliceCacheConfig::new(SliceCacheType::TwoQueues, 2)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_window_validation() {
        assert!(WindowType::tumbling(1000).validate().is_ok());
        assert!(WindowType::tumbling(0).validate().is_err());
        assert!(WindowType::sliding(1000, 250).validate().is_ok());
        assert!(WindowType::sliding(1000, 2000).validate().is_err());
        assert!(WindowType::sliding(1000, -1).validate().is_err());
        assert!(WindowType::Session { gap_ms: 0 }.validate().is_err());
    }

    #[test]
    fn test_window_kind() {
        assert!(WindowType::tumbling(10).is_time_based());
        assert!(!WindowType::Session { gap_ms: 10 }.is_time_based());
        assert_eq!(WindowType::sliding(10, 5).to_string(), "SLIDING(10ms, 5ms)");
        assert_eq!(
            WindowType::Threshold {
                column: "temp".into(),
                min_count: 3
            }
            .name(),
            "THRESHOLD"
        );
    }

    #[test]
    fn test_emit_ordering_and_overflow_policy() {
        assert_eq!(
            "unordered".parse::<EmitOrdering>().unwrap(),
            EmitOrdering::Unordered
        );
        assert_eq!(
            "force".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::ForceFinalize
        );
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::Warn);
    }
}
