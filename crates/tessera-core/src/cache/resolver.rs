//! Per-worker slice resolution through a cache.

use std::sync::Arc;

use tracing::trace;

use super::{CacheEntry, CacheError, CacheStats, SliceCache, SliceCacheKind};
use crate::config::{SliceCacheConfig, SliceCacheType};
use crate::slice::{Slice, SliceAssigner, SliceError, SliceStore};

/// Resolves record timestamps to slices, consulting a local cache first.
///
/// One resolver belongs to one worker thread; the store behind it is shared.
/// Cached handles are validated against the store on every hit, so a slice
/// disposed behind the worker's back is detected and re-resolved.
pub struct CachedSliceResolver<S, A> {
    store: Arc<SliceStore<S, A>>,
    cache: Option<SliceCacheKind>,
    stats: CacheStats,
}

impl<S, A> CachedSliceResolver<S, A>
where
    S: Default,
    A: SliceAssigner,
{
    /// Creates a resolver over `store` with the configured cache.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InsufficientCapacity`] if the cache capacity is
    /// below the policy minimum.
    pub fn new(store: Arc<SliceStore<S, A>>, config: &SliceCacheConfig) -> Result<Self, CacheError> {
        Ok(Self {
            store,
            cache: SliceCacheKind::from_config(config)?,
            stats: CacheStats::default(),
        })
    }

    /// Returns the slice containing `timestamp`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::Late`] for timestamps below the effective
    /// watermark, on hits and misses alike.
    pub fn resolve(&mut self, timestamp: i64) -> Result<Arc<Slice<S>>, SliceError> {
        let Some(cache) = self.cache.as_mut() else {
            return self.store.get_or_create_slice(timestamp);
        };

        self.store.check_lateness(timestamp)?;

        if let Some(entry) = cache.lookup(timestamp) {
            if let Some(slice) = self.store.resolve(entry.slice_id, entry.range) {
                cache.on_access(entry.range);
                self.stats.hits += 1;
                return Ok(slice);
            }
            trace!("Dropping stale handle {} for {}", entry.slice_id, entry.range);
            cache.invalidate(entry.range);
        }

        self.stats.misses += 1;
        let slice = self.store.get_or_create_slice(timestamp)?;
        cache.insert(CacheEntry::new(slice.range(), slice.id()));
        Ok(slice)
    }

    /// Returns the hit and miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Returns the shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<SliceStore<S, A>> {
        &self.store
    }

    /// Returns the cache policy in use.
    #[must_use]
    pub fn cache_type(&self) -> SliceCacheType {
        self.cache
            .as_ref()
            .map_or(SliceCacheType::None, SliceCacheKind::cache_type)
    }

    /// Drops every cached handle.
    pub fn clear(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }
}

impl<S, A> std::fmt::Debug for CachedSliceResolver<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSliceResolver")
            .field("cache", &self.cache)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::window::TumblingWindowAssigner;
    use crate::sequence::OriginId;
    use crate::slice::{SliceStoreConfig, TimeWindowAssigner};

    const ORIGIN: OriginId = OriginId(1);

    fn store() -> Arc<SliceStore<(), TimeWindowAssigner>> {
        Arc::new(SliceStore::new(
            TimeWindowAssigner::Tumbling(TumblingWindowAssigner::from_millis(100)),
            [ORIGIN],
            SliceStoreConfig::default(),
        ))
    }

    #[test]
    fn test_hits_and_misses() {
        let store = store();
        let mut resolver =
            CachedSliceResolver::new(Arc::clone(&store), &SliceCacheConfig::new(SliceCacheType::Lru, 2))
                .unwrap();

        let a = resolver.resolve(10).unwrap();
        let b = resolver.resolve(50).unwrap();
        let c = resolver.resolve(150).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(resolver.stats(), CacheStats { hits: 1, misses: 2 });
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_disposed_slice_is_re_resolved() {
        let store = store();
        let mut resolver = CachedSliceResolver::new(
            Arc::clone(&store),
            &SliceCacheConfig::new(SliceCacheType::Fifo, 4),
        )
        .unwrap();

        let first = resolver.resolve(10).unwrap();
        store.dispose(first.range()).unwrap();

        let second = resolver.resolve(20).unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.is_open());
        assert_eq!(resolver.stats().misses, 2);
    }

    #[test]
    fn test_late_hit_is_rejected() {
        let store = store();
        let mut resolver = CachedSliceResolver::new(
            Arc::clone(&store),
            &SliceCacheConfig::new(SliceCacheType::SecondChance, 4),
        )
        .unwrap();

        resolver.resolve(10).unwrap();
        store.advance_watermark(ORIGIN, 50).unwrap();
        assert!(matches!(resolver.resolve(20), Err(SliceError::Late { .. })));
        assert!(resolver.resolve(60).is_ok());
    }

    #[test]
    fn test_no_cache_goes_to_store() {
        let store = store();
        let mut resolver =
            CachedSliceResolver::new(Arc::clone(&store), &SliceCacheConfig::default()).unwrap();
        assert_eq!(resolver.cache_type(), SliceCacheType::None);

        let a = resolver.resolve(10).unwrap();
        let b = resolver.resolve(20).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(resolver.stats(), CacheStats::default());
    }
}
