//! Hash join slices.

use std::sync::atomic::{AtomicUsize, Ordering};

use fxhash::FxHashMap;
use parking_lot::Mutex;

use super::{JoinKey, JoinPredicate, JoinRecord, JoinSide, JoinSliceState, JoinStrategy};

/// Number of shards per table.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Hash table split into independently locked shards by key hash.
pub struct ShardedHashTable {
    shards: Box<[Mutex<FxHashMap<JoinKey, Vec<JoinRecord>>>]>,
    len: AtomicUsize,
}

impl ShardedHashTable {
    /// Creates a table with `shards` shards (at least one).
    #[must_use]
    pub fn with_shards(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| Mutex::new(FxHashMap::default()))
                .collect(),
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn shard(&self, key: &[u8]) -> &Mutex<FxHashMap<JoinKey, Vec<JoinRecord>>> {
        let hash = fxhash::hash64(key) as usize;
        &self.shards[hash % self.shards.len()]
    }

    /// Inserts a record under its key.
    pub fn insert(&self, record: JoinRecord) {
        let mut shard = self.shard(&record.key).lock();
        shard.entry(record.key.clone()).or_default().push(record);
        drop(shard);
        self.len.fetch_add(1, Ordering::Release);
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns `true` if the table holds no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of distinct keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Calls `f` for every record.
    pub fn for_each(&self, mut f: impl FnMut(&JoinRecord)) {
        for shard in self.shards.iter() {
            for record in shard.lock().values().flatten() {
                f(record);
            }
        }
    }

    /// Calls `f` for every record stored under `key`.
    pub fn for_each_match(&self, key: &[u8], mut f: impl FnMut(&JoinRecord)) {
        if let Some(records) = self.shard(key).lock().get(key) {
            records.iter().for_each(&mut f);
        }
    }
}

impl Default for ShardedHashTable {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }
}

impl std::fmt::Debug for ShardedHashTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedHashTable")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

/// Slice state holding both sides in sharded hash tables.
///
/// The probe walks the left table of one slice and looks each key up in the
/// right table of the other. Left shards are always locked before right
/// shards, so concurrent probes over shared slices cannot deadlock.
#[derive(Debug, Default)]
pub struct HashJoinSlice {
    left: ShardedHashTable,
    right: ShardedHashTable,
}

impl HashJoinSlice {
    /// Returns the table of `side`.
    #[must_use]
    pub fn table(&self, side: JoinSide) -> &ShardedHashTable {
        match side {
            JoinSide::Left => &self.left,
            JoinSide::Right => &self.right,
        }
    }
}

impl JoinSliceState for HashJoinSlice {
    const STRATEGY: JoinStrategy = JoinStrategy::Hash;

    #[inline]
    fn append(&self, side: JoinSide, record: JoinRecord) {
        self.table(side).insert(record);
    }

    fn record_count(&self, side: JoinSide) -> usize {
        self.table(side).len()
    }

    fn probe(
        left: &Self,
        right: &Self,
        predicate: &JoinPredicate,
        emit: &mut dyn FnMut(&JoinRecord, &JoinRecord),
    ) {
        if left.left.is_empty() || right.right.is_empty() {
            return;
        }
        left.left.for_each(|l| {
            right.right.for_each_match(&l.key, |r| {
                if predicate.accepts(l, r) {
                    emit(l, r);
                }
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::stream_join::test_util::record;
    use std::sync::Arc;

    #[test]
    fn test_duplicate_keys_keep_multiplicity() {
        let table = ShardedHashTable::with_shards(4);
        table.insert(record(1, 10));
        table.insert(record(1, 11));
        table.insert(record(2, 12));

        assert_eq!(table.len(), 3);
        assert_eq!(table.key_count(), 2);

        let mut matched = Vec::new();
        table.for_each_match(&record(1, 0).key, |r| matched.push(r.timestamp));
        matched.sort_unstable();
        assert_eq!(matched, vec![10, 11]);
    }

    #[test]
    fn test_probe_with_filter() {
        let a = HashJoinSlice::default();
        let b = HashJoinSlice::default();
        a.append(JoinSide::Left, record(1, 10));
        a.append(JoinSide::Left, record(1, 30));
        b.append(JoinSide::Right, record(1, 20));
        b.append(JoinSide::Right, record(2, 20));

        let predicate = JoinPredicate::with_filter(Arc::new(|l: &JoinRecord, r: &JoinRecord| {
            l.timestamp < r.timestamp
        }));
        let mut pairs = Vec::new();
        HashJoinSlice::probe(&a, &b, &predicate, &mut |l, r| {
            pairs.push((l.timestamp, r.timestamp));
        });
        assert_eq!(pairs, vec![(10, 20)]);
    }

    #[test]
    fn test_concurrent_inserts() {
        let slice = HashJoinSlice::default();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let slice = &slice;
                scope.spawn(move || {
                    for i in 0..250 {
                        slice.append(JoinSide::Left, record(i % 10, worker * 1000 + i));
                    }
                });
            }
        });
        assert_eq!(slice.record_count(JoinSide::Left), 1000);
        assert_eq!(slice.table(JoinSide::Left).key_count(), 10);
    }
}
