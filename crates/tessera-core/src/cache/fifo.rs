//! First-in-first-out slice cache.

use std::collections::VecDeque;

use super::{ensure_capacity, find_containing, position_of, CacheEntry, CacheError, SliceCache};
use crate::config::SliceCacheType;
use crate::slice::SliceRange;

/// Evicts the entry that was inserted first. Hits do not change the order.
#[derive(Debug, Clone)]
pub struct FifoCache {
    /// Oldest entry at the front
    entries: VecDeque<CacheEntry>,
    capacity: usize,
}

impl FifoCache {
    /// Creates an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InsufficientCapacity`] for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        ensure_capacity(SliceCacheType::Fifo, capacity, 1)?;
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        })
    }
}

impl SliceCache for FifoCache {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn lookup(&self, timestamp: i64) -> Option<CacheEntry> {
        find_containing(&self.entries, timestamp)
    }

    fn on_access(&mut self, _range: SliceRange) {}

    fn on_evict(&mut self) -> Option<CacheEntry> {
        self.entries.pop_front()
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        if let Some(pos) = position_of(&self.entries, entry.range) {
            self.entries[pos] = entry;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.on_evict()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    fn invalidate(&mut self, range: SliceRange) -> bool {
        position_of(&self.entries, range)
            .and_then(|pos| self.entries.remove(pos))
            .is_some()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}
