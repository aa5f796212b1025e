//! # Stream Join Handler
//!
//! Shared runtime of one join instance and the workers that feed it.
//!
//! ## Element Flow
//!
//! ```text
//! ingest sequencer -> build (slice cache -> store)
//!                  -> watermark completion (per-origin order)
//!                  -> finalize + trigger (coordinator lock)
//!                  -> probe (no lock) -> dispose -> output sequencer
//! ```
//!
//! ## Locking
//!
//! - `lifecycle`: ingest holds a read guard for the whole call; `stop` takes
//!   the write guard and so waits for in-flight elements.
//! - `build_gate`: builds hold a read guard from their lateness check to the
//!   append; finalization holds the write guard, so no record lands in a
//!   slice after it was finalized.
//! - `coordinator`: serializes finalization with window registration.
//!
//! Locks are always taken in this order.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::build::{JoinBuildWorker, JoinSliceState};
use super::output::OutputLayout;
use super::{JoinCounters, JoinMetrics, JoinOutput, JoinSide, StreamJoinConfig};
use crate::cache::CacheStats;
use crate::config::{ConfigError, EmitOrdering};
use crate::operator::trigger::{ProbeTask, WindowTriggerCoordinator};
use crate::operator::window::WindowId;
use crate::operator::{OperatorError, OperatorState, RecordBuffer, StreamElement, TerminationType};
use crate::sequence::{OriginId, SequenceData, SequenceError, Sequencer, INITIAL_SEQUENCE_NUMBER};
use crate::slice::{Slice, SliceAssigner, SliceFinalized, SliceRange, SliceStore, TimeWindowAssigner};
use crate::time::Watermark;

/// A probe task with the slices of its window.
struct ScheduledProbe<S> {
    task: ProbeTask,
    slices: Vec<Arc<Slice<S>>>,
}

/// Orders window results and stamps output sequence numbers.
struct OutputStage {
    origin: OriginId,
    ordering: EmitOrdering,
    /// Keyed by trigger sequence; `None` for windows without matches
    sequencer: Sequencer<Option<(WindowId, RecordBatch)>>,
    next_sequence: Mutex<u64>,
}

impl OutputStage {
    fn emit(
        &self,
        trigger_sequence: u64,
        result: Option<(WindowId, RecordBatch)>,
    ) -> Result<Vec<JoinOutput>, SequenceError> {
        // Held across admit and numbering so sequence numbers follow release order
        let mut next = self.next_sequence.lock();
        let released = match self.ordering {
            EmitOrdering::WindowEnd => self.sequencer.admit(
                self.origin,
                SequenceData::single(trigger_sequence),
                result,
            )?,
            EmitOrdering::Unordered => vec![result],
        };

        Ok(released
            .into_iter()
            .flatten()
            .map(|(window, batch)| {
                let sequence = SequenceData::single(*next);
                *next += 1;
                JoinOutput {
                    origin: self.origin,
                    sequence,
                    window,
                    batch,
                }
            })
            .collect())
    }
}

struct JoinRuntime<S: JoinSliceState> {
    config: Arc<StreamJoinConfig>,
    store: Arc<SliceStore<S, TimeWindowAssigner>>,
    coordinator: Mutex<WindowTriggerCoordinator>,
    ingest: Sequencer<StreamElement>,
    output: OutputStage,
    layout: OutputLayout,
    counters: JoinCounters,
    lifecycle: RwLock<OperatorState>,
    build_gate: RwLock<()>,
    /// Effective watermark of the last finalization pass
    advanced_to: AtomicI64,
}

impl<S: JoinSliceState> JoinRuntime<S> {
    /// Builds `element` and reports its sequence as completed.
    ///
    /// The sequence completes even if the build fails, so a rejected element
    /// never holds back the watermark of its origin.
    fn complete(
        &self,
        build: &mut JoinBuildWorker<S>,
        element: StreamElement,
    ) -> Result<(), OperatorError> {
        let origin = element.origin();
        let sequence = element.sequence();
        let (built, watermark) = match element {
            StreamElement::Records(buffer) => (self.build(build, &buffer), None),
            StreamElement::Watermark(event) => (Ok(()), Some(event.watermark)),
        };

        let completed = self
            .store
            .update_watermark_sequenced(origin, sequence, watermark);
        built?;
        completed?;
        Ok(())
    }

    fn build(
        &self,
        build: &mut JoinBuildWorker<S>,
        buffer: &RecordBuffer,
    ) -> Result<(), OperatorError> {
        let side = self
            .config
            .side_of(buffer.origin)
            .ok_or(OperatorError::UnknownOrigin(buffer.origin))?;

        let _gate = self.build_gate.read();
        match build.execute(side, buffer) {
            Ok(stats) => {
                let appended = match side {
                    JoinSide::Left => &self.counters.left_records,
                    JoinSide::Right => &self.counters.right_records,
                };
                JoinCounters::add(appended, stats.appended);
                JoinCounters::add(&self.counters.late_records, stats.late);
                JoinCounters::add(&self.counters.invalid_records, stats.invalid);
                Ok(())
            }
            Err(err @ (OperatorError::SchemaMismatch(_) | OperatorError::Time(_))) => {
                warn!(
                    "{}: dropping {side} batch {} from {}: {err}",
                    self.config.name(),
                    buffer.sequence,
                    buffer.origin
                );
                JoinCounters::add(&self.counters.rejected_batches, 1);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Finalizes slices behind the effective watermark and schedules the
    /// windows it closes.
    fn advance(&self) -> Vec<ScheduledProbe<S>> {
        let watermark = self.store.effective_watermark();
        if watermark.timestamp() <= self.advanced_to.load(Ordering::Acquire) {
            return Vec::new();
        }

        let _gate = self.build_gate.write();
        let mut coordinator = self.coordinator.lock();
        let watermark = self.store.effective_watermark();
        let events = self.store.finalize_pending();
        self.register(&mut coordinator, &events);
        let tasks = coordinator.on_watermark(watermark);
        self.advanced_to
            .fetch_max(watermark.timestamp(), Ordering::AcqRel);
        self.schedule(&mut coordinator, tasks)
    }

    /// Marks `origin` idle and schedules the windows its release closes.
    fn idle(&self, origin: OriginId) -> Result<Vec<ScheduledProbe<S>>, OperatorError> {
        let _gate = self.build_gate.write();
        let mut coordinator = self.coordinator.lock();
        let mut events = self.store.mark_idle(origin)?;
        let watermark = self.store.effective_watermark();
        events.extend(self.store.finalize_pending());
        self.register(&mut coordinator, &events);
        let tasks = coordinator.on_watermark(watermark);
        self.advanced_to
            .fetch_max(watermark.timestamp(), Ordering::AcqRel);
        Ok(self.schedule(&mut coordinator, tasks))
    }

    fn register(&self, coordinator: &mut WindowTriggerCoordinator, events: &[SliceFinalized]) {
        for event in events {
            let windows = self.store.assigner().windows_of_slice(event.range);
            if let Some(orphan) = coordinator.on_slice_finalized(event, &windows) {
                self.dispose(orphan);
            }
        }
    }

    fn schedule(
        &self,
        coordinator: &mut WindowTriggerCoordinator,
        tasks: Vec<ProbeTask>,
    ) -> Vec<ScheduledProbe<S>> {
        JoinCounters::add(&self.counters.windows_triggered, tasks.len());
        tasks
            .into_iter()
            .map(|task| {
                coordinator.mark_scheduled(task.window);
                ScheduledProbe {
                    slices: self.store.slices_in(task.window),
                    task,
                }
            })
            .collect()
    }

    fn run_probes(&self, probes: Vec<ScheduledProbe<S>>) -> Result<Vec<JoinOutput>, OperatorError> {
        let mut outputs = Vec::new();
        for scheduled in probes {
            let result = self.probe(&scheduled);
            let ScheduledProbe { task, slices } = scheduled;
            drop(slices);

            let released = self.coordinator.lock().on_probed(task.window);
            for range in released.unwrap_or_default() {
                self.dispose(range);
            }

            let emitted = self.output.emit(task.trigger_sequence, result)?;
            JoinCounters::add(&self.counters.outputs_emitted, emitted.len());
            outputs.extend(emitted);
        }
        Ok(outputs)
    }

    /// Joins every left record of the window with every right record of the
    /// window, over all pairs of its slices.
    fn probe(&self, scheduled: &ScheduledProbe<S>) -> Option<(WindowId, RecordBatch)> {
        let window = scheduled.task.window;
        let mut builder = self.layout.builder(window);
        for left in &scheduled.slices {
            for right in &scheduled.slices {
                S::probe(
                    left.state(),
                    right.state(),
                    &self.config.predicate,
                    &mut |l, r| builder.push(l, r),
                );
            }
        }

        let matches = builder.len();
        JoinCounters::add(&self.counters.matches, matches);
        debug!(
            "{}: probed {window} over {} slices, {matches} matches",
            self.config.name(),
            scheduled.slices.len()
        );

        match builder.finish() {
            Ok(batch) => batch.map(|batch| (window, batch)),
            Err(err) => {
                error!("{}: failed to assemble {window}: {err}", self.config.name());
                None
            }
        }
    }

    fn dispose(&self, range: SliceRange) {
        if self.store.dispose(range).is_some() {
            JoinCounters::add(&self.counters.slices_disposed, 1);
        }
    }

    /// Finalizes and probes everything that is left.
    fn drain(&self) -> Result<Vec<JoinOutput>, OperatorError> {
        let probes = {
            let _gate = self.build_gate.write();
            let mut coordinator = self.coordinator.lock();
            let events = self.store.finalize_all();
            self.register(&mut coordinator, &events);
            let tasks = coordinator.trigger_all();
            self.schedule(&mut coordinator, tasks)
        };
        self.run_probes(probes)
    }
}

/// Shared handle of one stream join instance.
///
/// Cloning the handle is cheap; every clone controls the same join.
pub struct StreamJoinHandler<S: JoinSliceState> {
    runtime: Arc<JoinRuntime<S>>,
}

impl<S: JoinSliceState> StreamJoinHandler<S> {
    /// Validates `config` and creates the join runtime.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Config`] for invalid configurations or a
    /// strategy that does not match the slice state `S`.
    pub fn new(config: StreamJoinConfig) -> Result<Self, OperatorError> {
        if config.strategy != S::STRATEGY {
            return Err(ConfigError::InvalidValue {
                name: "strategy",
                reason: format!("{} handler cannot run {}", S::STRATEGY, config.strategy),
            }
            .into());
        }
        let assigner = config.validate()?;
        let layout = match (&config.left_schema, &config.right_schema) {
            (Some(left), Some(right)) => OutputLayout::new(left, right),
            _ => return Err(ConfigError::InvalidSchema("schemas are required".to_string()).into()),
        };

        let store = Arc::new(SliceStore::new(
            assigner,
            config.origins(),
            config.store_config(),
        ));
        let output = OutputStage {
            origin: config.output_origin,
            ordering: config.emit_ordering,
            sequencer: Sequencer::with_stall_threshold(config.sequence_stall_threshold),
            next_sequence: Mutex::new(INITIAL_SEQUENCE_NUMBER),
        };

        debug!(
            "Created {} join {} over {} ({} left, {} right origins)",
            S::STRATEGY,
            config.name(),
            config.window,
            config.left_origins.len(),
            config.right_origins.len()
        );

        Ok(Self {
            runtime: Arc::new(JoinRuntime {
                ingest: Sequencer::with_stall_threshold(config.sequence_stall_threshold),
                config: Arc::new(config),
                store,
                coordinator: Mutex::new(WindowTriggerCoordinator::new()),
                output,
                layout,
                counters: JoinCounters::default(),
                lifecycle: RwLock::new(OperatorState::Created),
                build_gate: RwLock::new(()),
                advanced_to: AtomicI64::new(i64::MIN),
            }),
        })
    }

    fn transition(
        &self,
        action: &'static str,
        from: OperatorState,
        to: OperatorState,
    ) -> Result<(), OperatorError> {
        let mut state = self.runtime.lifecycle.write();
        if *state != from {
            return Err(OperatorError::InvalidLifecycle {
                action,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Moves `Created -> Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidLifecycle`] in any other state.
    pub fn setup(&self) -> Result<(), OperatorError> {
        self.transition("set up", OperatorState::Created, OperatorState::Ready)
    }

    /// Moves `Ready -> Running`; input is accepted from now on.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidLifecycle`] in any other state.
    pub fn start(&self) -> Result<(), OperatorError> {
        self.transition("start", OperatorState::Ready, OperatorState::Running)?;
        info!("{}: started", self.runtime.config.name());
        Ok(())
    }

    /// Stops the join after in-flight elements completed.
    ///
    /// [`TerminationType::Graceful`] finalizes every slice, probes every
    /// outstanding window and returns the results. Other terminations discard
    /// all state. Elements still waiting in the ingest sequencer are dropped in
    /// both cases.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidLifecycle`] if the join is already
    /// stopped, or the error of a draining probe. State is released either way.
    pub fn stop(&self, termination: TerminationType) -> Result<Vec<JoinOutput>, OperatorError> {
        let rt = &self.runtime;
        let mut state = rt.lifecycle.write();
        if *state == OperatorState::Stopped {
            return Err(OperatorError::InvalidLifecycle {
                action: "stop",
                state: *state,
            });
        }

        let drained = if termination.drains() && *state == OperatorState::Running {
            rt.drain()
        } else {
            Ok(Vec::new())
        };

        let pending = rt.ingest.discard_pending();
        if pending > 0 {
            warn!(
                "{}: dropped {pending} elements waiting for sequence gaps",
                rt.config.name()
            );
        }
        let slices = rt.store.clear();
        let windows = rt.coordinator.lock().clear();
        rt.output.sequencer.discard_pending();
        *state = OperatorState::Stopped;

        info!(
            "{}: stopped ({termination}), released {slices} slices and {windows} windows",
            rt.config.name()
        );
        drained
    }

    /// Creates a worker with its own slice cache.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidLifecycle`] before setup or after stop.
    pub fn worker(&self) -> Result<JoinWorker<S>, OperatorError> {
        let state = *self.runtime.lifecycle.read();
        if !matches!(state, OperatorState::Ready | OperatorState::Running) {
            return Err(OperatorError::InvalidLifecycle {
                action: "create a worker for",
                state,
            });
        }

        let build = JoinBuildWorker::new(
            Arc::clone(&self.runtime.config),
            Arc::clone(&self.runtime.store),
        )
        .map_err(|err| ConfigError::InvalidValue {
            name: "slice_cache",
            reason: err.to_string(),
        })?;

        Ok(JoinWorker {
            runtime: Arc::clone(&self.runtime),
            build,
        })
    }

    /// Marks `origin` idle so it no longer holds back the watermark, and
    /// returns the window results this releases.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::NotRunning`] outside the running state and
    /// [`OperatorError::UnknownOrigin`] for unconfigured origins.
    pub fn mark_idle(&self, origin: OriginId) -> Result<Vec<JoinOutput>, OperatorError> {
        let rt = &self.runtime;
        let state = rt.lifecycle.read();
        if *state != OperatorState::Running {
            return Err(OperatorError::NotRunning(*state));
        }
        if rt.config.side_of(origin).is_none() {
            return Err(OperatorError::UnknownOrigin(origin));
        }

        info!("{}: {origin} is idle", rt.config.name());
        let probes = rt.idle(origin)?;
        rt.run_probes(probes)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> OperatorState {
        *self.runtime.lifecycle.read()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StreamJoinConfig {
        &self.runtime.config
    }

    /// Returns the slice store.
    #[must_use]
    pub fn store(&self) -> &Arc<SliceStore<S, TimeWindowAssigner>> {
        &self.runtime.store
    }

    /// Returns the output batch schema.
    #[must_use]
    pub fn output_schema(&self) -> SchemaRef {
        self.runtime.layout.schema()
    }

    /// Returns the effective watermark of the store.
    #[must_use]
    pub fn watermark(&self) -> Watermark {
        self.runtime.store.effective_watermark()
    }

    /// Returns the number of windows waiting for the watermark.
    #[must_use]
    pub fn pending_windows(&self) -> usize {
        self.runtime.coordinator.lock().pending_count()
    }

    /// Returns origins whose ingest buffer reached the stall threshold.
    #[must_use]
    pub fn stalled_origins(&self) -> Vec<OriginId> {
        self.runtime
            .ingest
            .stalled_origins(self.runtime.config.sequence_stall_threshold)
    }

    /// Returns a snapshot of the join counters.
    #[must_use]
    pub fn metrics(&self) -> JoinMetrics {
        self.runtime.counters.snapshot()
    }
}

impl<S: JoinSliceState> Clone for StreamJoinHandler<S> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl<S: JoinSliceState> std::fmt::Debug for StreamJoinHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamJoinHandler")
            .field("name", &self.runtime.config.name())
            .field("strategy", &S::STRATEGY)
            .field("state", &self.state())
            .field("store", &self.runtime.store)
            .finish_non_exhaustive()
    }
}

/// One ingest thread of a join.
///
/// Workers are independent; feed each from its own thread.
pub struct JoinWorker<S: JoinSliceState> {
    runtime: Arc<JoinRuntime<S>>,
    build: JoinBuildWorker<S>,
}

impl<S: JoinSliceState> JoinWorker<S> {
    /// Sequences, builds and completes one element, returning every window
    /// result it released.
    ///
    /// Late rows, rows with null keys or timestamps, batches that do not match
    /// the side's schema and duplicate elements are dropped and counted.
    ///
    /// Every element released by the sequencer is built and completed, even
    /// after one of them fails. The first failure is returned and the windows
    /// closed by the call are released by the next one.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::NotRunning`] outside the running state,
    /// [`OperatorError::UnknownOrigin`] for unconfigured origins and
    /// [`OperatorError::Slice`] for store invariant violations.
    pub fn ingest(&mut self, element: StreamElement) -> Result<Vec<JoinOutput>, OperatorError> {
        let rt = &self.runtime;
        let state = rt.lifecycle.read();
        if *state != OperatorState::Running {
            return Err(OperatorError::NotRunning(*state));
        }

        let origin = element.origin();
        if rt.config.side_of(origin).is_none() {
            return Err(OperatorError::UnknownOrigin(origin));
        }

        let released = match rt.ingest.admit(origin, element.sequence(), element) {
            Ok(released) => released,
            Err(SequenceError::Duplicate { origin, sequence }) => {
                debug!(
                    "{}: ignoring duplicate {sequence} from {origin}",
                    rt.config.name()
                );
                JoinCounters::add(&rt.counters.duplicate_elements, 1);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut failure = None;
        for element in released {
            if let Err(err) = rt.complete(&mut self.build, element) {
                if failure.is_none() {
                    failure = Some(err);
                } else {
                    error!("{}: {err}", rt.config.name());
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let probes = rt.advance();
        rt.run_probes(probes)
    }

    /// Returns the hit and miss counters of this worker's slice cache.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.build.cache_stats()
    }
}

impl<S: JoinSliceState> std::fmt::Debug for JoinWorker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinWorker")
            .field("build", &self.build)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowType;
    use crate::operator::stream_join::{HashJoinSlice, JoinStrategy, NestedLoopSlice};
    use crate::operator::WatermarkEvent;
    use crate::slice::SliceError;
    use crate::time::TimeFunction;
    use arrow_array::{Int64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};

    const LEFT: OriginId = OriginId(1);
    const RIGHT: OriginId = OriginId(2);

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("ts", DataType::Int64, false),
        ]))
    }

    fn config(strategy: JoinStrategy) -> StreamJoinConfig {
        StreamJoinConfig::builder()
            .left_key_column("id")
            .right_key_column("id")
            .left_schema(schema())
            .right_schema(schema())
            .left_time(TimeFunction::event_time("ts"))
            .right_time(TimeFunction::event_time("ts"))
            .left_origins([LEFT])
            .right_origins([RIGHT])
            .window(WindowType::tumbling(1000))
            .strategy(strategy)
            .build()
    }

    fn records(origin: OriginId, sequence: u64, rows: &[(i64, i64)]) -> StreamElement {
        let batch = RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(
                    rows.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
                )),
                Arc::new(Int64Array::from(
                    rows.iter().map(|(_, ts)| *ts).collect::<Vec<_>>(),
                )),
            ],
        )
        .unwrap();
        RecordBuffer::new(origin, SequenceData::single(sequence), 0, batch).into()
    }

    fn watermark(origin: OriginId, sequence: u64, ts: i64) -> StreamElement {
        WatermarkEvent::new(origin, SequenceData::single(sequence), ts).into()
    }

    fn running<S: JoinSliceState>(strategy: JoinStrategy) -> StreamJoinHandler<S> {
        let handler = StreamJoinHandler::new(config(strategy)).unwrap();
        handler.setup().unwrap();
        handler.start().unwrap();
        handler
    }

    #[test]
    fn test_lifecycle_transitions() {
        let handler =
            StreamJoinHandler::<NestedLoopSlice>::new(config(JoinStrategy::NestedLoop)).unwrap();
        assert_eq!(handler.state(), OperatorState::Created);
        assert!(handler.worker().is_err());
        assert!(handler.start().is_err());

        handler.setup().unwrap();
        let mut worker = handler.worker().unwrap();
        assert!(matches!(
            worker.ingest(watermark(LEFT, 1, 0)),
            Err(OperatorError::NotRunning(OperatorState::Ready))
        ));

        handler.start().unwrap();
        assert_eq!(handler.state(), OperatorState::Running);
        assert!(handler.setup().is_err());

        assert!(handler.stop(TerminationType::HardStop).unwrap().is_empty());
        assert_eq!(handler.state(), OperatorState::Stopped);
        assert!(handler.stop(TerminationType::Graceful).is_err());
        assert!(matches!(
            worker.ingest(watermark(LEFT, 1, 0)),
            Err(OperatorError::NotRunning(OperatorState::Stopped))
        ));
    }

    #[test]
    fn test_strategy_must_match_state() {
        assert!(matches!(
            StreamJoinHandler::<HashJoinSlice>::new(config(JoinStrategy::NestedLoop)),
            Err(OperatorError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_window_joins_on_watermark() {
        let handler = running::<HashJoinSlice>(JoinStrategy::Hash);
        let mut worker = handler.worker().unwrap();

        assert!(worker
            .ingest(records(LEFT, 1, &[(1, 100), (2, 200)]))
            .unwrap()
            .is_empty());
        assert!(worker
            .ingest(records(RIGHT, 1, &[(1, 300), (3, 400)]))
            .unwrap()
            .is_empty());
        assert!(worker.ingest(watermark(LEFT, 2, 1000)).unwrap().is_empty());

        let outputs = worker.ingest(watermark(RIGHT, 2, 1000)).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].window, WindowId::new(0, 1000));
        assert_eq!(outputs[0].sequence, SequenceData::single(1));
        assert_eq!(outputs[0].batch.num_rows(), 1);

        let metrics = handler.metrics();
        assert_eq!(metrics.left_records, 2);
        assert_eq!(metrics.right_records, 2);
        assert_eq!(metrics.matches, 1);
        assert_eq!(metrics.slices_disposed, 1);
        assert!(handler.store().is_empty());
    }

    #[test]
    fn test_unknown_origin_and_duplicates() {
        let handler = running::<NestedLoopSlice>(JoinStrategy::NestedLoop);
        let mut worker = handler.worker().unwrap();

        assert!(matches!(
            worker.ingest(watermark(OriginId(9), 1, 0)),
            Err(OperatorError::UnknownOrigin(OriginId(9)))
        ));

        worker.ingest(records(LEFT, 1, &[(1, 10)])).unwrap();
        assert!(worker.ingest(records(LEFT, 1, &[(1, 10)])).unwrap().is_empty());
        assert_eq!(handler.metrics().duplicate_elements, 1);
        assert_eq!(handler.metrics().left_records, 1);
    }

    #[test]
    fn test_out_of_order_elements_wait_for_gap() {
        let handler = running::<NestedLoopSlice>(JoinStrategy::NestedLoop);
        let mut worker = handler.worker().unwrap();

        // Watermark 2 arrives before records 1 on the left origin
        worker.ingest(watermark(LEFT, 2, 1000)).unwrap();
        worker.ingest(records(RIGHT, 1, &[(7, 500)])).unwrap();
        assert!(worker.ingest(watermark(RIGHT, 2, 1000)).unwrap().is_empty());

        let outputs = worker.ingest(records(LEFT, 1, &[(7, 600)])).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].batch.num_rows(), 1);
        assert_eq!(handler.metrics().late_records, 0);
    }

    #[test]
    fn test_idle_origin_releases_windows() {
        let handler = running::<HashJoinSlice>(JoinStrategy::Hash);
        let mut worker = handler.worker().unwrap();
        worker.ingest(records(LEFT, 1, &[(4, 10)])).unwrap();
        worker.ingest(records(RIGHT, 1, &[(4, 20)])).unwrap();
        assert!(worker.ingest(watermark(LEFT, 2, 1000)).unwrap().is_empty());
        assert_eq!(handler.pending_windows(), 0);

        let outputs = handler.mark_idle(RIGHT).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(handler.watermark().timestamp(), 1000);
        assert!(matches!(
            handler.mark_idle(OriginId(9)),
            Err(OperatorError::UnknownOrigin(_))
        ));
    }

    #[test]
    fn test_graceful_stop_drains_open_windows() {
        let handler = running::<NestedLoopSlice>(JoinStrategy::NestedLoop);
        let mut worker = handler.worker().unwrap();
        worker.ingest(records(LEFT, 1, &[(1, 100), (1, 1100)])).unwrap();
        worker.ingest(records(RIGHT, 1, &[(1, 150), (1, 1150)])).unwrap();

        let outputs = handler.stop(TerminationType::Graceful).unwrap();
        let windows: Vec<WindowId> = outputs.iter().map(|o| o.window).collect();
        assert_eq!(
            windows,
            vec![WindowId::new(0, 1000), WindowId::new(1000, 2000)]
        );
        let sequences: Vec<u64> = outputs.iter().map(|o| o.sequence.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert!(handler.store().is_empty());
    }

    #[test]
    fn test_failed_build_still_completes_its_sequence() {
        let handler = running::<NestedLoopSlice>(JoinStrategy::NestedLoop);
        let mut worker = handler.worker().unwrap();
        // Conflicts with the slice [0, 1000) a record at 100 maps to
        handler.store().insert_slice(SliceRange::new(500, 1000));

        worker.ingest(watermark(RIGHT, 1, 2000)).unwrap();
        assert!(matches!(
            worker.ingest(records(LEFT, 1, &[(1, 100)])),
            Err(OperatorError::Slice(SliceError::DuplicateSlice { .. }))
        ));

        worker.ingest(watermark(LEFT, 2, 2000)).unwrap();
        assert_eq!(handler.watermark().timestamp(), 2000);
        assert!(handler.store().is_empty());
    }

    #[test]
    fn test_error_mid_release_completes_remaining_elements() {
        let handler = running::<NestedLoopSlice>(JoinStrategy::NestedLoop);
        let mut worker = handler.worker().unwrap();
        handler.store().insert_slice(SliceRange::new(500, 1000));

        worker.ingest(records(RIGHT, 1, &[(1, 1600)])).unwrap();
        worker.ingest(watermark(RIGHT, 2, 2000)).unwrap();

        // Left sequences 2 and 3 wait for 1, then all three are released at once
        assert!(worker.ingest(records(LEFT, 2, &[(1, 100)])).unwrap().is_empty());
        assert!(worker.ingest(watermark(LEFT, 3, 2000)).unwrap().is_empty());
        assert!(matches!(
            worker.ingest(records(LEFT, 1, &[(1, 1500)])),
            Err(OperatorError::Slice(SliceError::DuplicateSlice { .. }))
        ));
        assert_eq!(handler.metrics().left_records, 1);
        assert_eq!(handler.watermark().timestamp(), 2000);

        let outputs = worker.ingest(records(LEFT, 4, &[(2, 2500)])).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].window, WindowId::new(1000, 2000));
        assert_eq!(outputs[0].sequence, SequenceData::single(1));
        assert_eq!(outputs[0].batch.num_rows(), 1);
    }
}
