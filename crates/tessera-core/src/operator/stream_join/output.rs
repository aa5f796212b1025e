//! Join output assembly.
//!
//! Matched pairs reference rows of their source batches; the builder gathers
//! each output column with one `interleave` call over the distinct source
//! batches.

use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Int64Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use arrow_select::interleave::interleave;
use fxhash::FxHashMap;

use super::JoinRecord;
use crate::operator::window::WindowId;
use crate::operator::OperatorError;

/// Name of the window start column.
pub const WINDOW_START_COLUMN: &str = "window_start";
/// Name of the window end column.
pub const WINDOW_END_COLUMN: &str = "window_end";

/// Output schema and column split of a join.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    schema: SchemaRef,
    left_columns: usize,
    right_columns: usize,
}

impl OutputLayout {
    /// Builds the layout `[window_start, window_end, left..., right...]`.
    ///
    /// Right fields are nullable; right names that collide with an earlier
    /// column are prefixed with `right_`.
    #[must_use]
    pub fn new(left: &Schema, right: &Schema) -> Self {
        let mut fields = vec![
            Field::new(WINDOW_START_COLUMN, DataType::Int64, false),
            Field::new(WINDOW_END_COLUMN, DataType::Int64, false),
        ];
        fields.extend(left.fields().iter().map(|f| f.as_ref().clone()));

        for field in right.fields() {
            let taken = left.field_with_name(field.name()).is_ok()
                || field.name() == WINDOW_START_COLUMN
                || field.name() == WINDOW_END_COLUMN;
            let name = if taken {
                format!("right_{}", field.name())
            } else {
                field.name().clone()
            };
            fields.push(Field::new(name, field.data_type().clone(), true));
        }

        Self {
            schema: Arc::new(Schema::new(fields)),
            left_columns: left.fields().len(),
            right_columns: right.fields().len(),
        }
    }

    /// Returns the output schema.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Starts collecting the matches of `window`.
    #[must_use]
    pub fn builder(&self, window: WindowId) -> JoinBatchBuilder<'_> {
        JoinBatchBuilder {
            layout: self,
            window,
            left: SideRows::default(),
            right: SideRows::default(),
        }
    }
}

#[derive(Default)]
struct SideRows {
    batches: Vec<Arc<RecordBatch>>,
    /// Batch pointer to position in `batches`
    positions: FxHashMap<usize, usize>,
    rows: Vec<(usize, usize)>,
}

impl SideRows {
    fn push(&mut self, record: &JoinRecord) {
        let batches = &mut self.batches;
        let position = *self
            .positions
            .entry(Arc::as_ptr(&record.batch) as usize)
            .or_insert_with(|| {
                batches.push(Arc::clone(&record.batch));
                batches.len() - 1
            });
        self.rows.push((position, record.row));
    }

    fn gather(&self, column: usize) -> Result<ArrayRef, OperatorError> {
        let arrays: Vec<&dyn Array> = self
            .batches
            .iter()
            .map(|batch| batch.column(column).as_ref())
            .collect();
        Ok(interleave(&arrays, &self.rows)?)
    }
}

/// Collects matched pairs of one window into a record batch.
pub struct JoinBatchBuilder<'a> {
    layout: &'a OutputLayout,
    window: WindowId,
    left: SideRows,
    right: SideRows,
}

impl JoinBatchBuilder<'_> {
    /// Adds one matched pair.
    #[inline]
    pub fn push(&mut self, left: &JoinRecord, right: &JoinRecord) {
        self.left.push(left);
        self.right.push(right);
    }

    /// Returns the number of collected pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.left.rows.len()
    }

    /// Returns `true` if no pair was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left.rows.is_empty()
    }

    /// Builds the output batch, `None` if no pair was collected.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Arrow`] if the source columns do not match the
    /// layout.
    pub fn finish(self) -> Result<Option<RecordBatch>, OperatorError> {
        let rows = self.len();
        if rows == 0 {
            return Ok(None);
        }

        let mut columns: Vec<ArrayRef> =
            Vec::with_capacity(2 + self.layout.left_columns + self.layout.right_columns);
        columns.push(Arc::new(Int64Array::from(vec![self.window.start; rows])));
        columns.push(Arc::new(Int64Array::from(vec![self.window.end; rows])));
        for column in 0..self.layout.left_columns {
            columns.push(self.left.gather(column)?);
        }
        for column in 0..self.layout.right_columns {
            columns.push(self.right.gather(column)?);
        }

        Ok(Some(RecordBatch::try_new(self.layout.schema(), columns)?))
    }
}
