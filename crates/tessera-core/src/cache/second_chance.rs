//! Second-chance (clock) slice cache.

use std::collections::VecDeque;

use super::{ensure_capacity, CacheEntry, CacheError, SliceCache};
use crate::config::SliceCacheType;
use crate::slice::SliceRange;

/// FIFO where a hit sets a reference bit.
///
/// On eviction the oldest entry is inspected: with its bit set it is moved
/// to the back with the bit cleared, otherwise it is the victim. One full
/// rotation clears every bit, so eviction always terminates.
#[derive(Debug, Clone)]
pub struct SecondChanceCache {
    /// Oldest entry at the front, with its reference bit
    entries: VecDeque<(CacheEntry, bool)>,
    capacity: usize,
}

impl SecondChanceCache {
    /// Creates an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InsufficientCapacity`] for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        ensure_capacity(SliceCacheType::SecondChance, capacity, 1)?;
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    fn position(&self, range: SliceRange) -> Option<usize> {
        self.entries
            .iter()
            .position(|(entry, _)| entry.range == range)
    }
}

impl SliceCache for SecondChanceCache {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn lookup(&self, timestamp: i64) -> Option<CacheEntry> {
        self.entries
            .iter()
            .find(|(entry, _)| entry.range.contains(timestamp))
            .map(|(entry, _)| *entry)
    }

    fn on_access(&mut self, range: SliceRange) {
        if let Some(pos) = self.position(range) {
            self.entries[pos].1 = true;
        }
    }

    fn on_evict(&mut self) -> Option<CacheEntry> {
        while let Some((entry, referenced)) = self.entries.pop_front() {
            if !referenced {
                return Some(entry);
            }
            self.entries.push_back((entry, false));
        }
        None
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        if let Some(pos) = self.position(entry.range) {
            self.entries[pos] = (entry, true);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.on_evict()
        } else {
            None
        };
        self.entries.push_back((entry, false));
        evicted
    }

    fn invalidate(&mut self, range: SliceRange) -> bool {
        self.position(range)
            .and_then(|pos| self.entries.remove(pos))
            .is_some()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}
