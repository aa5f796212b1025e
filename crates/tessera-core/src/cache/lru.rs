//! Least-recently-used slice cache.

use std::collections::VecDeque;

use super::{ensure_capacity, find_containing, position_of, CacheEntry, CacheError, SliceCache};
use crate::config::SliceCacheType;
use crate::slice::SliceRange;

/// Evicts the entry that was hit or inserted longest ago.
///
/// Entries are kept in recency order, most recent at the front.
#[derive(Debug, Clone)]
pub struct LruCache {
    entries: VecDeque<CacheEntry>,
    capacity: usize,
}

impl LruCache {
    /// Creates an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InsufficientCapacity`] for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        ensure_capacity(SliceCacheType::Lru, capacity, 1)?;
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        })
    }
}

impl SliceCache for LruCache {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn lookup(&self, timestamp: i64) -> Option<CacheEntry> {
        find_containing(&self.entries, timestamp)
    }

    fn on_access(&mut self, range: SliceRange) {
        if let Some(pos) = position_of(&self.entries, range) {
            if pos > 0 {
                if let Some(entry) = self.entries.remove(pos) {
                    self.entries.push_front(entry);
                }
            }
        }
    }

    fn on_evict(&mut self) -> Option<CacheEntry> {
        self.entries.pop_back()
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        if let Some(pos) = position_of(&self.entries, entry.range) {
            self.entries[pos] = entry;
            self.on_access(entry.range);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.on_evict()
        } else {
            None
        };
        self.entries.push_front(entry);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_util::entry;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(3).unwrap();
        cache.insert(entry(1));
        cache.insert(entry(2));
        cache.insert(entry(3));

        // Touch 1 so 2 becomes the oldest
        cache.on_access(entry(1).range);
        assert_eq!(cache.insert(entry(4)), Some(entry(2)));
        assert_eq!(cache.insert(entry(5)), Some(entry(3)));
        assert_eq!(cache.insert(entry(6)), Some(entry(1)));
    }

    #[test]
    fn test_reinsert_refreshes_recency() {
        let mut cache = LruCache::new(2).unwrap();
        cache.insert(entry(1));
        cache.insert(entry(2));
        cache.insert(entry(1));
        assert_eq!(cache.insert(entry(3)), Some(entry(2)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(LruCache::new(0).is_err());
    }
}
