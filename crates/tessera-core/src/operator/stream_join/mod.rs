//! # Windowed Stream Join
//!
//! Joins two streams on key equality within time windows, using slices as the
//! unit of state.
//!
//! ## Build and Probe
//!
//! Every record is appended once, to the slice containing its timestamp, on
//! the side it came from (build). When the watermark passes a window end,
//! every left record of the window is matched against every right record of
//! the window (probe). For sliding windows the probe runs over the cross
//! product of the window's slices, so a slice shared by several windows is
//! stored once and probed once per window.
//!
//! ## Strategies
//!
//! - [`JoinStrategy::NestedLoop`]: records in paged append-only vectors,
//!   compared pairwise
//! - [`JoinStrategy::Hash`]: records in sharded hash tables keyed by join key
//!
//! Both produce the same multiset of matches.
//!
//! ## Output
//!
//! One [`JoinOutput`] per triggered window with matches. The batch schema is
//! `[window_start, window_end, left fields..., right fields...]`; right fields
//! whose names collide are prefixed with `right_`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tessera_core::operator::stream_join::{JoinStrategy, StreamJoin, StreamJoinConfig};
//! use tessera_core::{OriginId, WindowType};
//! # use std::sync::Arc;
//! # use arrow_schema::{DataType, Field, Schema};
//! # let orders = Arc::new(Schema::new(vec![Field::new("order_id", DataType::Int64, false)]));
//! # let payments = Arc::clone(&orders);
//!
//! let config = StreamJoinConfig::builder()
//!     .left_key_column("order_id")
//!     .right_key_column("order_id")
//!     .left_schema(orders)
//!     .right_schema(payments)
//!     .left_origins([OriginId(1)])
//!     .right_origins([OriginId(2)])
//!     .window(WindowType::tumbling(60_000))
//!     .strategy(JoinStrategy::Hash)
//!     .build();
//!
//! let join = StreamJoin::from_config(config).unwrap();
//! join.setup().unwrap();
//! join.start().unwrap();
//! let mut worker = join.worker().unwrap();
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Schema, SchemaRef};
use smallvec::SmallVec;

use super::window::WindowId;
use super::{OperatorError, OperatorState, StreamElement, TerminationType};
use crate::cache::CacheStats;
use crate::config::{ConfigError, EmitOrdering, OverflowPolicy, SliceCacheConfig, WindowType};
use crate::sequence::{OriginId, SequenceData, DEFAULT_STALL_THRESHOLD};
use crate::slice::{SliceStoreConfig, TimeWindowAssigner};
use crate::time::TimeFunction;

pub mod build;
pub mod hash;
pub mod handler;
pub mod nested_loop;
pub mod output;

pub use build::{BuildStats, JoinBuildWorker, JoinSliceState};
pub use handler::{JoinWorker, StreamJoinHandler};
pub use hash::HashJoinSlice;
pub use nested_loop::NestedLoopSlice;

/// Identifies which side of the join a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinSide {
    /// Left side of the join.
    Left,
    /// Right side of the join.
    Right,
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinSide::Left => write!(f, "left"),
            JoinSide::Right => write!(f, "right"),
        }
    }
}

/// Slice state layout and probe algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinStrategy {
    /// Pairwise comparison over paged vectors.
    #[default]
    NestedLoop,
    /// Key lookup in sharded hash tables.
    Hash,
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStrategy::NestedLoop => write!(f, "nested_loop"),
            JoinStrategy::Hash => write!(f, "hash"),
        }
    }
}

impl FromStr for JoinStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "nested_loop" | "nestedloop" | "nlj" => Ok(Self::NestedLoop),
            "hash" | "hash_join" | "hashjoin" => Ok(Self::Hash),
            _ => Err(format!("Unknown join strategy: {s}")),
        }
    }
}

/// Encoded join key: a type tag byte followed by the value bytes.
///
/// Int64 keys are tagged `0` and little-endian encoded, Utf8 keys are tagged
/// `1`, so keys of different types never compare equal.
pub type JoinKey = SmallVec<[u8; 16]>;

const INT64_KEY_TAG: u8 = 0;
const UTF8_KEY_TAG: u8 = 1;

/// Reads join keys from one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExtractor {
    column: String,
}

impl KeyExtractor {
    /// Creates an extractor for `column`.
    #[must_use]
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }

    /// Returns the key column name.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Checks that `schema` has the key column with a supported type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSchema`] otherwise.
    pub fn validate(&self, schema: &Schema) -> Result<(), ConfigError> {
        let field = schema
            .field_with_name(&self.column)
            .map_err(|_| ConfigError::InvalidSchema(format!("key column '{}' not found", self.column)))?;
        match field.data_type() {
            DataType::Int64 | DataType::Utf8 => Ok(()),
            other => Err(ConfigError::InvalidSchema(format!(
                "key column '{}' has unsupported type {other:?}",
                self.column
            ))),
        }
    }

    /// Binds the extractor to one batch.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::SchemaMismatch`] if the column is missing or
    /// has an unsupported type.
    pub fn bind<'a>(&self, batch: &'a RecordBatch) -> Result<KeyColumn<'a>, OperatorError> {
        let column = batch.column_by_name(&self.column).ok_or_else(|| {
            OperatorError::SchemaMismatch(format!("key column '{}' not found", self.column))
        })?;

        if let Some(values) = column.as_any().downcast_ref::<Int64Array>() {
            return Ok(KeyColumn::Int64(values));
        }
        if let Some(values) = column.as_any().downcast_ref::<StringArray>() {
            return Ok(KeyColumn::Utf8(values));
        }
        Err(OperatorError::SchemaMismatch(format!(
            "key column '{}' has unsupported type {:?}",
            self.column,
            column.data_type()
        )))
    }
}

/// A [`KeyExtractor`] bound to one batch.
#[derive(Debug, Clone, Copy)]
pub enum KeyColumn<'a> {
    /// Integer keys
    Int64(&'a Int64Array),
    /// String keys
    Utf8(&'a StringArray),
}

impl KeyColumn<'_> {
    /// Returns the encoded key of `row`, `None` for null keys.
    #[inline]
    #[must_use]
    pub fn key(&self, row: usize) -> Option<JoinKey> {
        match self {
            Self::Int64(values) => {
                if values.is_null(row) {
                    return None;
                }
                let mut key = JoinKey::new();
                key.push(INT64_KEY_TAG);
                key.extend_from_slice(&values.value(row).to_le_bytes());
                Some(key)
            }
            Self::Utf8(values) => {
                if values.is_null(row) {
                    return None;
                }
                let mut key = JoinKey::new();
                key.push(UTF8_KEY_TAG);
                key.extend_from_slice(values.value(row).as_bytes());
                Some(key)
            }
        }
    }
}

/// One stored input row.
///
/// Rows share their source batch; the record only keeps the row index.
#[derive(Debug, Clone)]
pub struct JoinRecord {
    /// Event or ingestion time in milliseconds
    pub timestamp: i64,
    /// Encoded join key
    pub key: JoinKey,
    /// Source batch
    pub batch: Arc<RecordBatch>,
    /// Row within `batch`
    pub row: usize,
}

impl JoinRecord {
    /// Returns the column named `name` of the source batch.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    /// Returns the Int64 value of column `name`, `None` if absent or null.
    #[must_use]
    pub fn int64_value(&self, name: &str) -> Option<i64> {
        let values = self.column(name)?.as_any().downcast_ref::<Int64Array>()?;
        (!values.is_null(self.row)).then(|| values.value(self.row))
    }

    /// Returns the Utf8 value of column `name`, `None` if absent or null.
    #[must_use]
    pub fn utf8_value(&self, name: &str) -> Option<&str> {
        let values = self.column(name)?.as_any().downcast_ref::<StringArray>()?;
        (!values.is_null(self.row)).then(|| values.value(self.row))
    }
}

/// Residual condition evaluated on key-equal pairs.
pub type JoinFilter = Arc<dyn Fn(&JoinRecord, &JoinRecord) -> bool + Send + Sync>;

/// Join condition: key equality plus an optional residual filter.
#[derive(Clone, Default)]
pub struct JoinPredicate {
    filter: Option<JoinFilter>,
}

impl JoinPredicate {
    /// Key equality only.
    #[must_use]
    pub fn key_equality() -> Self {
        Self::default()
    }

    /// Key equality and `filter`.
    #[must_use]
    pub fn with_filter(filter: JoinFilter) -> Self {
        Self {
            filter: Some(filter),
        }
    }

    /// Returns `true` if a residual filter is set.
    #[must_use]
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Full condition: equal keys and accepted by the filter.
    #[inline]
    #[must_use]
    pub fn matches(&self, left: &JoinRecord, right: &JoinRecord) -> bool {
        left.key == right.key && self.accepts(left, right)
    }

    /// Residual filter only; callers guarantee key equality.
    #[inline]
    #[must_use]
    pub fn accepts(&self, left: &JoinRecord, right: &JoinRecord) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(left, right))
    }
}

impl fmt::Debug for JoinPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPredicate")
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Default window: one minute tumbling.
pub const DEFAULT_WINDOW_SIZE_MS: i64 = 60_000;

/// Configuration for a windowed stream join.
///
/// Schemas and origins of both sides are required; see
/// [`validate`](Self::validate).
#[derive(Debug, Clone)]
pub struct StreamJoinConfig {
    /// Left stream key column name.
    pub left_key_column: String,
    /// Right stream key column name.
    pub right_key_column: String,
    /// Timestamp source of left records.
    pub left_time: TimeFunction,
    /// Timestamp source of right records.
    pub right_time: TimeFunction,
    /// Schema of left batches.
    pub left_schema: Option<SchemaRef>,
    /// Schema of right batches.
    pub right_schema: Option<SchemaRef>,
    /// Origins feeding the left side.
    pub left_origins: Vec<OriginId>,
    /// Origins feeding the right side.
    pub right_origins: Vec<OriginId>,
    /// Origin stamped on outputs.
    pub output_origin: OriginId,
    /// Window definition (time-based only).
    pub window: WindowType,
    /// Build/probe strategy.
    pub strategy: JoinStrategy,
    /// Per-worker slice cache.
    pub slice_cache: SliceCacheConfig,
    /// Grace period before windows close (milliseconds).
    pub allowed_lateness_ms: i64,
    /// Cap on open slices.
    pub max_open_slices: Option<usize>,
    /// Reaction to exceeding `max_open_slices`.
    pub overflow_policy: OverflowPolicy,
    /// Output order.
    pub emit_ordering: EmitOrdering,
    /// Buffered elements per origin before a stall warning.
    pub sequence_stall_threshold: usize,
    /// Join condition.
    pub predicate: JoinPredicate,
    /// Operator ID for logging.
    pub operator_id: Option<String>,
}

impl Default for StreamJoinConfig {
    fn default() -> Self {
        Self {
            left_key_column: String::new(),
            right_key_column: String::new(),
            left_time: TimeFunction::IngestionTime,
            right_time: TimeFunction::IngestionTime,
            left_schema: None,
            right_schema: None,
            left_origins: Vec::new(),
            right_origins: Vec::new(),
            output_origin: OriginId(0),
            window: WindowType::tumbling(DEFAULT_WINDOW_SIZE_MS),
            strategy: JoinStrategy::NestedLoop,
            slice_cache: SliceCacheConfig::default(),
            allowed_lateness_ms: 0,
            max_open_slices: None,
            overflow_policy: OverflowPolicy::Warn,
            emit_ordering: EmitOrdering::WindowEnd,
            sequence_stall_threshold: DEFAULT_STALL_THRESHOLD,
            predicate: JoinPredicate::key_equality(),
            operator_id: None,
        }
    }
}

impl StreamJoinConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> StreamJoinConfigBuilder {
        StreamJoinConfigBuilder::default()
    }

    /// Checks the configuration and returns the window assigner it describes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for missing schemas or origins, unsupported key
    /// or time columns, origins on both sides, unsupported or invalid windows,
    /// and invalid cache or lateness settings.
    pub fn validate(&self) -> Result<TimeWindowAssigner, ConfigError> {
        for side in [JoinSide::Left, JoinSide::Right] {
            let schema = self
                .schema(side)
                .ok_or_else(|| ConfigError::InvalidSchema(format!("{side} schema is required")))?;
            self.key_extractor(side).validate(schema)?;
            self.time_function(side)
                .validate(schema)
                .map_err(|err| ConfigError::InvalidSchema(format!("{side} time: {err}")))?;
        }

        if self.left_origins.is_empty() {
            return Err(ConfigError::NoOrigins("left"));
        }
        if self.right_origins.is_empty() {
            return Err(ConfigError::NoOrigins("right"));
        }
        if let Some(origin) = self
            .left_origins
            .iter()
            .find(|origin| self.right_origins.contains(origin))
        {
            return Err(ConfigError::OverlappingOrigins(*origin));
        }

        self.window.validate()?;
        let assigner = TimeWindowAssigner::from_window_type(&self.window)?;
        self.slice_cache.validate()?;

        if self.allowed_lateness_ms < 0 {
            return Err(ConfigError::InvalidValue {
                name: "allowed_lateness_ms",
                reason: format!("must not be negative, got {}", self.allowed_lateness_ms),
            });
        }
        if self.max_open_slices == Some(0) {
            return Err(ConfigError::InvalidValue {
                name: "max_open_slices",
                reason: "must be positive".to_string(),
            });
        }
        Ok(assigner)
    }

    /// Returns the side fed by `origin`.
    #[must_use]
    pub fn side_of(&self, origin: OriginId) -> Option<JoinSide> {
        if self.left_origins.contains(&origin) {
            Some(JoinSide::Left)
        } else if self.right_origins.contains(&origin) {
            Some(JoinSide::Right)
        } else {
            None
        }
    }

    /// Returns the schema of `side`.
    #[must_use]
    pub fn schema(&self, side: JoinSide) -> Option<&SchemaRef> {
        match side {
            JoinSide::Left => self.left_schema.as_ref(),
            JoinSide::Right => self.right_schema.as_ref(),
        }
    }

    /// Returns the time function of `side`.
    #[must_use]
    pub fn time_function(&self, side: JoinSide) -> &TimeFunction {
        match side {
            JoinSide::Left => &self.left_time,
            JoinSide::Right => &self.right_time,
        }
    }

    /// Returns the key extractor of `side`.
    #[must_use]
    pub fn key_extractor(&self, side: JoinSide) -> KeyExtractor {
        match side {
            JoinSide::Left => KeyExtractor::new(self.left_key_column.as_str()),
            JoinSide::Right => KeyExtractor::new(self.right_key_column.as_str()),
        }
    }

    /// Returns every input origin, left side first.
    pub fn origins(&self) -> impl Iterator<Item = OriginId> + '_ {
        self.left_origins
            .iter()
            .chain(self.right_origins.iter())
            .copied()
    }

    /// Returns the slice store options derived from this configuration.
    #[must_use]
    pub fn store_config(&self) -> SliceStoreConfig {
        let config = SliceStoreConfig::default()
            .with_allowed_lateness(self.allowed_lateness_ms)
            .with_stall_threshold(self.sequence_stall_threshold);
        match self.max_open_slices {
            Some(max) => config.with_max_open_slices(max, self.overflow_policy),
            None => config,
        }
    }

    /// Returns the operator ID used in log lines.
    #[must_use]
    pub fn name(&self) -> &str {
        self.operator_id.as_deref().unwrap_or("stream_join")
    }
}

/// Builder for `StreamJoinConfig`.
#[derive(Debug, Default)]
pub struct StreamJoinConfigBuilder {
    config: StreamJoinConfig,
}

impl StreamJoinConfigBuilder {
    /// Sets the left stream key column name.
    #[must_use]
    pub fn left_key_column(mut self, column: impl Into<String>) -> Self {
        self.config.left_key_column = column.into();
        self
    }

    /// Sets the right stream key column name.
    #[must_use]
    pub fn right_key_column(mut self, column: impl Into<String>) -> Self {
        self.config.right_key_column = column.into();
        self
    }

    /// Sets the left timestamp source.
    #[must_use]
    pub fn left_time(mut self, time: TimeFunction) -> Self {
        self.config.left_time = time;
        self
    }

    /// Sets the right timestamp source.
    #[must_use]
    pub fn right_time(mut self, time: TimeFunction) -> Self {
        self.config.right_time = time;
        self
    }

    /// Sets the left batch schema.
    #[must_use]
    pub fn left_schema(mut self, schema: SchemaRef) -> Self {
        self.config.left_schema = Some(schema);
        self
    }

    /// Sets the right batch schema.
    #[must_use]
    pub fn right_schema(mut self, schema: SchemaRef) -> Self {
        self.config.right_schema = Some(schema);
        self
    }

    /// Sets the origins feeding the left side.
    #[must_use]
    pub fn left_origins(mut self, origins: impl IntoIterator<Item = OriginId>) -> Self {
        self.config.left_origins = origins.into_iter().collect();
        self
    }

    /// Sets the origins feeding the right side.
    #[must_use]
    pub fn right_origins(mut self, origins: impl IntoIterator<Item = OriginId>) -> Self {
        self.config.right_origins = origins.into_iter().collect();
        self
    }

    /// Sets the origin stamped on outputs.
    #[must_use]
    pub fn output_origin(mut self, origin: OriginId) -> Self {
        self.config.output_origin = origin;
        self
    }

    /// Sets the window definition.
    #[must_use]
    pub fn window(mut self, window: WindowType) -> Self {
        self.config.window = window;
        self
    }

    /// Sets the build/probe strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: JoinStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Sets the per-worker slice cache.
    #[must_use]
    pub fn slice_cache(mut self, cache: SliceCacheConfig) -> Self {
        self.config.slice_cache = cache;
        self
    }

    /// Sets the allowed lateness in milliseconds.
    #[must_use]
    pub fn allowed_lateness_ms(mut self, ms: i64) -> Self {
        self.config.allowed_lateness_ms = ms;
        self
    }

    /// Caps the number of open slices.
    #[must_use]
    pub fn max_open_slices(mut self, max: usize, policy: OverflowPolicy) -> Self {
        self.config.max_open_slices = Some(max);
        self.config.overflow_policy = policy;
        self
    }

    /// Sets the output order.
    #[must_use]
    pub fn emit_ordering(mut self, ordering: EmitOrdering) -> Self {
        self.config.emit_ordering = ordering;
        self
    }

    /// Sets the sequencer stall threshold.
    #[must_use]
    pub fn sequence_stall_threshold(mut self, threshold: usize) -> Self {
        self.config.sequence_stall_threshold = threshold;
        self
    }

    /// Adds a residual filter evaluated on key-equal pairs.
    #[must_use]
    pub fn filter(
        mut self,
        filter: impl Fn(&JoinRecord, &JoinRecord) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.config.predicate = JoinPredicate::with_filter(Arc::new(filter));
        self
    }

    /// Sets the operator ID.
    #[must_use]
    pub fn operator_id(mut self, id: impl Into<String>) -> Self {
        self.config.operator_id = Some(id.into());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> StreamJoinConfig {
        self.config
    }
}

/// Snapshot of join counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinMetrics {
    /// Left records appended to slices.
    pub left_records: u64,
    /// Right records appended to slices.
    pub right_records: u64,
    /// Records dropped for arriving behind the watermark.
    pub late_records: u64,
    /// Records dropped for a null key or timestamp.
    pub invalid_records: u64,
    /// Batches dropped for not matching the configured schema.
    pub rejected_batches: u64,
    /// Elements rejected by the ingest sequencer as duplicates.
    pub duplicate_elements: u64,
    /// Windows handed to probes.
    pub windows_triggered: u64,
    /// Matched pairs produced.
    pub matches: u64,
    /// Output batches emitted.
    pub outputs_emitted: u64,
    /// Slices disposed after their last window was probed.
    pub slices_disposed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct JoinCounters {
    pub(crate) left_records: AtomicU64,
    pub(crate) right_records: AtomicU64,
    pub(crate) late_records: AtomicU64,
    pub(crate) invalid_records: AtomicU64,
    pub(crate) rejected_batches: AtomicU64,
    pub(crate) duplicate_elements: AtomicU64,
    pub(crate) windows_triggered: AtomicU64,
    pub(crate) matches: AtomicU64,
    pub(crate) outputs_emitted: AtomicU64,
    pub(crate) slices_disposed: AtomicU64,
}

impl JoinCounters {
    pub(crate) fn add(counter: &AtomicU64, value: usize) {
        if value > 0 {
            counter.fetch_add(value as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> JoinMetrics {
        JoinMetrics {
            left_records: self.left_records.load(Ordering::Relaxed),
            right_records: self.right_records.load(Ordering::Relaxed),
            late_records: self.late_records.load(Ordering::Relaxed),
            invalid_records: self.invalid_records.load(Ordering::Relaxed),
            rejected_batches: self.rejected_batches.load(Ordering::Relaxed),
            duplicate_elements: self.duplicate_elements.load(Ordering::Relaxed),
            windows_triggered: self.windows_triggered.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            outputs_emitted: self.outputs_emitted.load(Ordering::Relaxed),
            slices_disposed: self.slices_disposed.load(Ordering::Relaxed),
        }
    }
}

/// Join result of one window.
#[derive(Debug, Clone)]
pub struct JoinOutput {
    /// Output origin of the operator
    pub origin: OriginId,
    /// Output position, starting at 1
    pub sequence: SequenceData,
    /// Joined window
    pub window: WindowId,
    /// Matched pairs
    pub batch: RecordBatch,
}

/// Stream join with its strategy selected at configuration time.
#[derive(Debug)]
pub enum StreamJoin {
    /// Nested-loop slices
    NestedLoop(StreamJoinHandler<NestedLoopSlice>),
    /// Hash-table slices
    Hash(StreamJoinHandler<HashJoinSlice>),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            Self::NestedLoop($inner) => $body,
            Self::Hash($inner) => $body,
        }
    };
}

impl StreamJoin {
    /// Validates `config` and creates the handler for its strategy.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Config`] for invalid configurations.
    pub fn from_config(config: StreamJoinConfig) -> Result<Self, OperatorError> {
        Ok(match config.strategy {
            JoinStrategy::NestedLoop => Self::NestedLoop(StreamJoinHandler::new(config)?),
            JoinStrategy::Hash => Self::Hash(StreamJoinHandler::new(config)?),
        })
    }

    /// Returns the configured strategy.
    #[must_use]
    pub fn strategy(&self) -> JoinStrategy {
        match self {
            Self::NestedLoop(_) => JoinStrategy::NestedLoop,
            Self::Hash(_) => JoinStrategy::Hash,
        }
    }

    /// See [`StreamJoinHandler::setup`].
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidLifecycle`] unless the join was just created.
    pub fn setup(&self) -> Result<(), OperatorError> {
        dispatch!(self, handler => handler.setup())
    }

    /// See [`StreamJoinHandler::start`].
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidLifecycle`] unless the join is set up.
    pub fn start(&self) -> Result<(), OperatorError> {
        dispatch!(self, handler => handler.start())
    }

    /// See [`StreamJoinHandler::stop`].
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidLifecycle`] if the join is already
    /// stopped, or the error of a draining probe.
    pub fn stop(&self, termination: TerminationType) -> Result<Vec<JoinOutput>, OperatorError> {
        dispatch!(self, handler => handler.stop(termination))
    }

    /// Creates a worker with its own slice cache.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidLifecycle`] before setup or after stop.
    pub fn worker(&self) -> Result<StreamJoinWorker, OperatorError> {
        Ok(match self {
            Self::NestedLoop(handler) => StreamJoinWorker::NestedLoop(handler.worker()?),
            Self::Hash(handler) => StreamJoinWorker::Hash(handler.worker()?),
        })
    }

    /// See [`StreamJoinHandler::mark_idle`].
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError`] outside the running state or for unknown origins.
    pub fn mark_idle(&self, origin: OriginId) -> Result<Vec<JoinOutput>, OperatorError> {
        dispatch!(self, handler => handler.mark_idle(origin))
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> OperatorState {
        dispatch!(self, handler => handler.state())
    }

    /// Returns a snapshot of the join counters.
    #[must_use]
    pub fn metrics(&self) -> JoinMetrics {
        dispatch!(self, handler => handler.metrics())
    }

    /// Returns the output batch schema.
    #[must_use]
    pub fn output_schema(&self) -> SchemaRef {
        dispatch!(self, handler => handler.output_schema())
    }
}

/// Worker of a [`StreamJoin`].
#[derive(Debug)]
pub enum StreamJoinWorker {
    /// Nested-loop worker
    NestedLoop(JoinWorker<NestedLoopSlice>),
    /// Hash worker
    Hash(JoinWorker<HashJoinSlice>),
}

impl StreamJoinWorker {
    /// See [`JoinWorker::ingest`].
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError`] for elements the join cannot accept.
    pub fn ingest(&mut self, element: StreamElement) -> Result<Vec<JoinOutput>, OperatorError> {
        dispatch!(self, worker => worker.ingest(element))
    }

    /// Returns the hit and miss counters of this worker's slice cache.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        dispatch!(self, worker => worker.cache_stats())
    }
}
