//! # Slice Cache
//!
//! Small per-worker caches of slice handles in front of the [`SliceStore`].
//!
//! Records arriving close together in time hit the same few slices, so a
//! worker remembers the last handful of `(range, id)` pairs it resolved and
//! skips the store's index lock on a hit. Entries are weak: they hold the
//! slice identifier, not the slice, and every hit is validated against the
//! store. Evicting an entry never touches the slice itself.
//!
//! ## Policies
//!
//! | Policy | Eviction victim |
//! |---|---|
//! | [`LruCache`] | least recently used entry |
//! | [`FifoCache`] | oldest inserted entry |
//! | [`SecondChanceCache`] | oldest entry whose reference bit is clear |
//! | [`TwoQueuesCache`] | oldest probation entry, then least recently used protected entry |
//!
//! Policies are dispatched statically through [`SliceCacheKind`].
//!
//! [`SliceStore`]: crate::slice::SliceStore

mod fifo;
mod lru;
mod resolver;
mod second_chance;
mod two_queues;

pub use fifo::FifoCache;
pub use lru::LruCache;
pub use resolver::CachedSliceResolver;
pub use second_chance::SecondChanceCache;
pub use two_queues::TwoQueuesCache;

use std::collections::VecDeque;

use crate::config::{SliceCacheConfig, SliceCacheType};
use crate::slice::{SliceId, SliceRange};

/// A cached slice handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheEntry {
    /// Range of the cached slice
    pub range: SliceRange,
    /// Identifier used to validate the handle against the store
    pub slice_id: SliceId,
}

impl CacheEntry {
    /// Creates a cache entry.
    #[must_use]
    pub fn new(range: SliceRange, slice_id: SliceId) -> Self {
        Self { range, slice_id }
    }
}

/// Slice cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Capacity below the policy minimum
    #[error("{cache_type} cache needs at least {minimum} entries, got {capacity}")]
    InsufficientCapacity {
        /// Policy
        cache_type: SliceCacheType,
        /// Requested capacity
        capacity: usize,
        /// Minimum capacity of the policy
        minimum: usize,
    },
}

/// Hit and miss counters of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by the cache
    pub hits: u64,
    /// Lookups that went to the store
    pub misses: u64,
}

impl CacheStats {
    /// Returns the fraction of lookups answered by the cache.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Replacement policy over cached slice handles.
///
/// Capacity is fixed at construction. `lookup` has no side effects; callers
/// report a hit with `on_access` so policies can update recency metadata.
pub trait SliceCache: Send {
    /// Returns the maximum number of entries.
    fn capacity(&self) -> usize;

    /// Returns the current number of entries.
    fn len(&self) -> usize;

    /// Returns `true` if the cache holds no entry.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the entry whose range contains `timestamp`.
    fn lookup(&self, timestamp: i64) -> Option<CacheEntry>;

    /// Records a hit on the entry for `range`.
    fn on_access(&mut self, range: SliceRange);

    /// Removes and returns the policy's victim.
    fn on_evict(&mut self) -> Option<CacheEntry>;

    /// Inserts an entry, evicting a victim when full. Returns the victim.
    ///
    /// Inserting a range that is already cached replaces its handle in place.
    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry>;

    /// Drops the entry for `range`. Returns `true` if it was cached.
    fn invalidate(&mut self, range: SliceRange) -> bool;

    /// Drops every entry.
    fn clear(&mut self);
}

pub(crate) fn find_containing(
    entries: &VecDeque<CacheEntry>,
    timestamp: i64,
) -> Option<CacheEntry> {
    entries
        .iter()
        .find(|entry| entry.range.contains(timestamp))
        .copied()
}

pub(crate) fn position_of(entries: &VecDeque<CacheEntry>, range: SliceRange) -> Option<usize> {
    entries.iter().position(|entry| entry.range == range)
}

/// Statically dispatched slice cache.
#[derive(Debug, Clone)]
pub enum SliceCacheKind {
    /// Least recently used
    Lru(LruCache),
    /// First in, first out
    Fifo(FifoCache),
    /// FIFO with reference bits
    SecondChance(SecondChanceCache),
    /// Probation FIFO plus protected LRU
    TwoQueues(TwoQueuesCache),
}

impl SliceCacheKind {
    /// Builds the cache described by `config`; `None` for [`SliceCacheType::None`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InsufficientCapacity`] if the capacity is below
    /// the policy minimum.
    pub fn from_config(config: &SliceCacheConfig) -> Result<Option<Self>, CacheError> {
        let capacity = config.number_of_entries;
        let cache = match config.cache_type {
            SliceCacheType::None => return Ok(None),
            SliceCacheType::Lru => Self::Lru(LruCache::new(capacity)?),
            SliceCacheType::Fifo => Self::Fifo(FifoCache::new(capacity)?),
            SliceCacheType::SecondChance => Self::SecondChance(SecondChanceCache::new(capacity)?),
            SliceCacheType::TwoQueues => Self::TwoQueues(TwoQueuesCache::new(capacity)?),
        };
        Ok(Some(cache))
    }

    /// Returns the policy of this cache.
    #[must_use]
    pub fn cache_type(&self) -> SliceCacheType {
        match self {
            Self::Lru(_) => SliceCacheType::Lru,
            Self::Fifo(_) => SliceCacheType::Fifo,
            Self::SecondChance(_) => SliceCacheType::SecondChance,
            Self::TwoQueues(_) => SliceCacheType::TwoQueues,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $cache:ident => $body:expr) => {
        match $self {
            SliceCacheKind::Lru($cache) => $body,
            SliceCacheKind::Fifo($cache) => $body,
            SliceCacheKind::SecondChance($cache) => $body,
            SliceCacheKind::TwoQueues($cache) => $body,
        }
    };
}

impl SliceCache for SliceCacheKind {
    fn capacity(&self) -> usize {
        dispatch!(self, cache => cache.capacity())
    }

    fn len(&self) -> usize {
        dispatch!(self, cache => cache.len())
    }

    #[inline]
    fn lookup(&self, timestamp: i64) -> Option<CacheEntry> {
        dispatch!(self, cache => cache.lookup(timestamp))
    }

    #[inline]
    fn on_access(&mut self, range: SliceRange) {
        dispatch!(self, cache => cache.on_access(range));
    }

    fn on_evict(&mut self) -> Option<CacheEntry> {
        dispatch!(self, cache => cache.on_evict())
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        dispatch!(self, cache => cache.insert(entry))
    }

    fn invalidate(&mut self, range: SliceRange) -> bool {
        dispatch!(self, cache => cache.invalidate(range))
    }

    fn clear(&mut self) {
        dispatch!(self, cache => cache.clear());
    }
}

pub(crate) fn ensure_capacity(
    cache_type: SliceCacheType,
    capacity: usize,
    minimum: usize,
) -> Result<(), CacheError> {
    if capacity < minimum {
        return Err(CacheError::InsufficientCapacity {
            cache_type,
            capacity,
            minimum,
        });
    }
    Ok(())
}
