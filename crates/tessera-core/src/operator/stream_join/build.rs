//! Join build: routes input rows into the slices of their side.

use std::sync::Arc;

use tracing::trace;

use super::{JoinPredicate, JoinRecord, JoinSide, JoinStrategy, StreamJoinConfig};
use crate::cache::{CacheError, CacheStats, CachedSliceResolver};
use crate::operator::{OperatorError, RecordBuffer};
use crate::slice::{SliceError, SliceStore, TimeWindowAssigner};
use crate::time::TimeError;

/// Per-slice join state.
///
/// Appends happen concurrently from many workers while the slice is open.
/// Probes run on finalized slices only.
pub trait JoinSliceState: Default + Send + Sync + 'static {
    /// Strategy implemented by this state.
    const STRATEGY: JoinStrategy;

    /// Stores a record on `side`.
    fn append(&self, side: JoinSide, record: JoinRecord);

    /// Returns the number of records stored on `side`.
    fn record_count(&self, side: JoinSide) -> usize;

    /// Calls `emit` for every pair of a left record of `left` and a right
    /// record of `right` that satisfies `predicate`.
    fn probe(
        left: &Self,
        right: &Self,
        predicate: &JoinPredicate,
        emit: &mut dyn FnMut(&JoinRecord, &JoinRecord),
    );
}

/// Outcome of building one record buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Rows appended to a slice
    pub appended: usize,
    /// Rows behind the watermark
    pub late: usize,
    /// Rows with a null key or timestamp, or a timestamp without windows
    pub invalid: usize,
}

/// Thread-local build front end.
///
/// Owns the worker's slice cache; the store is shared.
pub struct JoinBuildWorker<S: JoinSliceState> {
    config: Arc<StreamJoinConfig>,
    resolver: CachedSliceResolver<S, TimeWindowAssigner>,
}

impl<S: JoinSliceState> JoinBuildWorker<S> {
    /// Creates a build worker over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the configured cache cannot be built.
    pub fn new(
        config: Arc<StreamJoinConfig>,
        store: Arc<SliceStore<S, TimeWindowAssigner>>,
    ) -> Result<Self, CacheError> {
        let resolver = CachedSliceResolver::new(store, &config.slice_cache)?;
        Ok(Self { config, resolver })
    }

    /// Appends every row of `buffer` to the slice containing its timestamp.
    ///
    /// Late rows, rows with a null key or timestamp, and rows whose windows do
    /// not fit in `i64` are skipped and counted.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::SchemaMismatch`] if the batch does not match the
    /// side's schema, [`OperatorError::Time`] if the time column cannot be
    /// read, and [`OperatorError::Slice`] for store invariant violations.
    pub fn execute(
        &mut self,
        side: JoinSide,
        buffer: &RecordBuffer,
    ) -> Result<BuildStats, OperatorError> {
        if let Some(schema) = self.config.schema(side) {
            if buffer.batch.schema_ref().fields() != schema.fields() {
                return Err(OperatorError::SchemaMismatch(format!(
                    "{side} batch from {} does not match the configured schema",
                    buffer.origin
                )));
            }
        }

        let times = self
            .config
            .time_function(side)
            .bind(&buffer.batch, buffer.creation_timestamp)
            .map_err(TimeError::from)?;
        let keys = self.config.key_extractor(side).bind(&buffer.batch)?;
        let batch = Arc::new(buffer.batch.clone());

        let mut stats = BuildStats::default();
        for row in 0..batch.num_rows() {
            let (Ok(timestamp), Some(key)) = (times.timestamp(row), keys.key(row)) else {
                stats.invalid += 1;
                continue;
            };

            match self.resolver.resolve(timestamp) {
                Ok(slice) => {
                    slice.state().append(
                        side,
                        JoinRecord {
                            timestamp,
                            key,
                            batch: Arc::clone(&batch),
                            row,
                        },
                    );
                    stats.appended += 1;
                }
                Err(SliceError::Late { .. }) => stats.late += 1,
                Err(SliceError::OutOfRange { .. }) => stats.invalid += 1,
                Err(err) => return Err(err.into()),
            }
        }

        trace!(
            "Built {} {side} rows from {} ({} late, {} invalid)",
            stats.appended,
            buffer.origin,
            stats.late,
            stats.invalid
        );
        Ok(stats)
    }

    /// Returns the hit and miss counters of the slice cache.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.stats()
    }

    /// Drops every cached slice handle.
    pub fn clear_cache(&mut self) {
        self.resolver.clear();
    }
}

impl<S: JoinSliceState> std::fmt::Debug for JoinBuildWorker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinBuildWorker")
            .field("strategy", &S::STRATEGY)
            .field("resolver", &self.resolver)
            .finish()
    }
}
