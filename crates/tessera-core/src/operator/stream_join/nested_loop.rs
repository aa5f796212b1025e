//! Nested-loop join slices.

use super::{JoinPredicate, JoinRecord, JoinSide, JoinSliceState, JoinStrategy};
use crate::slice::PagedVec;

/// Slice state holding both sides in append-only paged vectors.
///
/// Appends never block each other; the probe compares every left record with
/// every right record.
#[derive(Debug, Default)]
pub struct NestedLoopSlice {
    left: PagedVec<JoinRecord>,
    right: PagedVec<JoinRecord>,
}

impl NestedLoopSlice {
    fn side(&self, side: JoinSide) -> &PagedVec<JoinRecord> {
        match side {
            JoinSide::Left => &self.left,
            JoinSide::Right => &self.right,
        }
    }
}

impl JoinSliceState for NestedLoopSlice {
    const STRATEGY: JoinStrategy = JoinStrategy::NestedLoop;

    #[inline]
    fn append(&self, side: JoinSide, record: JoinRecord) {
        self.side(side).push(record);
    }

    fn record_count(&self, side: JoinSide) -> usize {
        self.side(side).len()
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
            right.right.for_each(|r| {
                if predicate.matches(l, r) {
                    emit(l, r);
                }
            });
        });
    }
}
