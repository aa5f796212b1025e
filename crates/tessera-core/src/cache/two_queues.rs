//! Two-queues slice cache.

use std::collections::VecDeque;

use super::{ensure_capacity, find_containing, position_of, CacheEntry, CacheError, SliceCache};
use crate::config::SliceCacheType;
use crate::slice::SliceRange;

/// Minimum capacity: one probation and one protected entry.
const MIN_CAPACITY: usize = 2;

/// Simplified 2Q: a FIFO probation queue in front of an LRU protected queue.
///
/// New entries land in probation. A hit on a probation entry promotes it to
/// the protected queue; when the protected queue is full its least recently
/// used entry is demoted to the back of probation. Victims are taken from
/// probation first, so one-off slices never push out hot ones.
#[derive(Debug, Clone)]
pub struct TwoQueuesCache {
    /// Oldest entry at the front
    probation: VecDeque<CacheEntry>,
    /// Most recently used entry at the front
    protected: VecDeque<CacheEntry>,
    probation_capacity: usize,
    protected_capacity: usize,
}

impl TwoQueuesCache {
    /// Creates an empty cache of `capacity` entries split between the queues.
    ///
    /// The protected queue gets `ceil((capacity - 2) / 5) + 1` entries and the
    /// probation queue the rest.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InsufficientCapacity`] if `capacity < 2`.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        ensure_capacity(SliceCacheType::TwoQueues, capacity, MIN_CAPACITY)?;
        let protected_capacity = ((capacity - MIN_CAPACITY) * 2 + 9) / 10 + 1;
        let probation_capacity = capacity - protected_capacity;
        Ok(Self {
            probation: VecDeque::with_capacity(probation_capacity),
            protected: VecDeque::with_capacity(protected_capacity),
            probation_capacity,
            protected_capacity,
        })
    }

    /// Returns the size of the FIFO probation queue.
    #[must_use]
    pub fn probation_capacity(&self) -> usize {
        self.probation_capacity
    }

    /// Returns the size of the LRU protected queue.
    #[must_use]
    pub fn protected_capacity(&self) -> usize {
        self.protected_capacity
    }

    fn promote(&mut self, entry: CacheEntry) {
        if self.protected.len() >= self.protected_capacity {
            if let Some(demoted) = self.protected.pop_back() {
                self.probation.push_back(demoted);
            }
        }
        self.protected.push_front(entry);
    }
}

impl SliceCache for TwoQueuesCache {
    fn capacity(&self) -> usize {
        self.probation_capacity + self.protected_capacity
    }

    fn len(&self) -> usize {
        self.probation.len() + self.protected.len()
    }

    fn lookup(&self, timestamp: i64) -> Option<CacheEntry> {
        find_containing(&self.protected, timestamp)
            .or_else(|| find_containing(&self.probation, timestamp))
    }

    fn on_access(&mut self, range: SliceRange) {
        if let Some(pos) = position_of(&self.protected, range) {
            if let Some(entry) = self.protected.remove(pos) {
                self.protected.push_front(entry);
            }
        } else if let Some(pos) = position_of(&self.probation, range) {
            if let Some(entry) = self.probation.remove(pos) {
                self.promote(entry);
            }
        }
    }

    fn on_evict(&mut self) -> Option<CacheEntry> {
        self.probation
            .pop_front()
            .or_else(|| self.protected.pop_back())
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        if let Some(pos) = position_of(&self.protected, entry.range) {
            self.protected[pos] = entry;
            return None;
        }
        if let Some(pos) = position_of(&self.probation, entry.range) {
            self.probation[pos] = entry;
            return None;
        }

        let evicted = if self.probation.len() >= self.probation_capacity {
            self.probation.pop_front()
        } else {
            None
        };
        self.probation.push_back(entry);
        evicted
    }

    fn invalidate(&mut self, range: SliceRange) -> bool {
        if let Some(pos) = position_of(&self.protected, range) {
            return self.protected.remove(pos).is_some();
        }
        position_of(&self.probation, range)
            .and_then(|pos| self.probation.remove(pos))
            .is_some()
    }

    fn clear(&mut self) {
        self.probation.clear();
        self.protected.clear();
    }
}
