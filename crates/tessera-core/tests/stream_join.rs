//! End-to-end tests of the windowed stream join.

use std::sync::Arc;
use std::thread;

use arrow_array::{Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use tessera_core::config::EmitOrdering;
use tessera_core::operator::stream_join::{
    HashJoinSlice, JoinOutput, JoinStrategy, StreamJoin, StreamJoinConfig, StreamJoinHandler,
};
use tessera_core::operator::window::WindowId;
use tessera_core::operator::{
    OperatorState, RecordBuffer, StreamElement, TerminationType, WatermarkEvent,
};
use tessera_core::time::TimeFunction;
use tessera_core::{OriginId, SequenceData, SliceRange, WindowType};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ORDERS: OriginId = OriginId(1);
const PAYMENTS: OriginId = OriginId(2);

fn orders_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("order_id", DataType::Int64, false),
        Field::new("ts", DataType::Int64, false),
        Field::new("amount", DataType::Int64, false),
    ]))
}

fn payments_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("order_id", DataType::Int64, false),
        Field::new("ts", DataType::Int64, false),
        Field::new("status", DataType::Utf8, false),
    ]))
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn config(strategy: JoinStrategy, window: WindowType) -> StreamJoinConfig {
    StreamJoinConfig::builder()
        .left_key_column("order_id")
        .right_key_column("order_id")
        .left_schema(orders_schema())
        .right_schema(payments_schema())
        .left_time(TimeFunction::event_time("ts"))
        .right_time(TimeFunction::event_time("ts"))
        .left_origins([ORDERS])
        .right_origins([PAYMENTS])
        .window(window)
        .strategy(strategy)
        .build()
}

fn running(config: StreamJoinConfig) -> StreamJoin {
    let join = StreamJoin::from_config(config).unwrap();
    join.setup().unwrap();
    join.start().unwrap();
    join
}

/// Orders batch of `(order_id, ts, amount)` rows.
fn orders(origin: OriginId, sequence: u64, rows: &[(i64, i64, i64)]) -> StreamElement {
    let batch = RecordBatch::try_new(
        orders_schema(),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.2))),
        ],
    )
    .unwrap();
    RecordBuffer::new(origin, SequenceData::single(sequence), 0, batch).into()
}

/// Payments batch of `(order_id, ts, status)` rows.
fn payments(origin: OriginId, sequence: u64, rows: &[(i64, i64, &str)]) -> StreamElement {
    let batch = RecordBatch::try_new(
        payments_schema(),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.2))),
        ],
    )
    .unwrap();
    RecordBuffer::new(origin, SequenceData::single(sequence), 0, batch).into()
}

fn watermark(origin: OriginId, sequence: u64, ts: i64) -> StreamElement {
    WatermarkEvent::new(origin, SequenceData::single(sequence), ts).into()
}

fn int64(batch: &RecordBatch, column: &str) -> Vec<i64> {
    batch
        .column_by_name(column)
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap()
        .values()
        .to_vec()
}

/// `(window_start, order_id, amount, status)` for every output row, sorted.
fn joined_rows(outputs: &[JoinOutput]) -> Vec<(i64, i64, i64, String)> {
    let mut rows = Vec::new();
    for output in outputs {
        let batch = &output.batch;
        let starts = int64(batch, "window_start");
        let ids = int64(batch, "order_id");
        let amounts = int64(batch, "amount");
        let status = batch
            .column_by_name("status")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        for row in 0..batch.num_rows() {
            rows.push((
                starts[row],
                ids[row],
                amounts[row],
                status.value(row).to_string(),
            ));
        }
    }
    rows.sort();
    rows
}

#[test]
fn test_tumbling_window_emits_after_watermark() {
    init_tracing();
    for strategy in [JoinStrategy::NestedLoop, JoinStrategy::Hash] {
        let join = running(config(strategy, WindowType::tumbling(1000)));
        let mut worker = join.worker().unwrap();

        assert!(worker.ingest(orders(ORDERS, 1, &[(1, 100, 50)])).unwrap().is_empty());
        assert!(worker
            .ingest(payments(PAYMENTS, 1, &[(1, 100, "paid")]))
            .unwrap()
            .is_empty());
        assert!(worker.ingest(watermark(ORDERS, 2, 100)).unwrap().is_empty());
        assert!(worker.ingest(watermark(PAYMENTS, 2, 100)).unwrap().is_empty());
        assert!(worker.ingest(watermark(ORDERS, 3, 1000)).unwrap().is_empty());

        let outputs = worker.ingest(watermark(PAYMENTS, 3, 1000)).unwrap();
        assert_eq!(outputs.len(), 1, "{strategy}");
        let output = &outputs[0];
        assert_eq!(output.window, WindowId::new(0, 1000));
        assert_eq!(output.sequence, SequenceData::single(1));
        assert_eq!(output.batch.schema(), join.output_schema());
        assert_eq!(int64(&output.batch, "window_start"), vec![0]);
        assert_eq!(int64(&output.batch, "window_end"), vec![1000]);
        assert_eq!(int64(&output.batch, "right_order_id"), vec![1]);
        assert_eq!(int64(&output.batch, "right_ts"), vec![100]);

        let metrics = join.metrics();
        assert_eq!(metrics.windows_triggered, 1);
        assert_eq!(metrics.matches, 1);
        assert_eq!(metrics.outputs_emitted, 1);
        assert_eq!(metrics.slices_disposed, 1);
    }
}

#[test]
fn test_late_records_are_dropped() {
    let handler =
        StreamJoinHandler::<HashJoinSlice>::new(config(JoinStrategy::Hash, WindowType::tumbling(1000)))
            .unwrap();
    handler.setup().unwrap();
    handler.start().unwrap();
    let mut worker = handler.worker().unwrap();

    worker.ingest(watermark(ORDERS, 1, 2000)).unwrap();
    worker.ingest(watermark(PAYMENTS, 1, 2000)).unwrap();
    assert_eq!(handler.watermark().timestamp(), 2000);

    worker.ingest(orders(ORDERS, 2, &[(1, 500, 10), (1, 2500, 20)])).unwrap();
    let metrics = handler.metrics();
    assert_eq!(metrics.late_records, 1);
    assert_eq!(metrics.left_records, 1);
    assert_eq!(handler.store().len(), 1);
    assert!(handler.store().slice_by_range(SliceRange::new(2000, 3000)).is_some());
}

#[test]
fn test_allowed_lateness_keeps_window_open() {
    let join = running(
        StreamJoinConfig::builder()
            .left_key_column("order_id")
            .right_key_column("order_id")
            .left_schema(orders_schema())
            .right_schema(payments_schema())
            .left_time(TimeFunction::event_time("ts"))
            .right_time(TimeFunction::event_time("ts"))
            .left_origins([ORDERS])
            .right_origins([PAYMENTS])
            .window(WindowType::tumbling(1000))
            .allowed_lateness_ms(500)
            .build(),
    );
    let mut worker = join.worker().unwrap();

    worker.ingest(orders(ORDERS, 1, &[(3, 900, 1)])).unwrap();
    worker.ingest(watermark(ORDERS, 2, 1200)).unwrap();
    assert!(worker.ingest(watermark(PAYMENTS, 1, 1200)).unwrap().is_empty());

    // 800 is behind the watermark but within the allowed lateness
    worker.ingest(payments(PAYMENTS, 2, &[(3, 800, "late")])).unwrap();
    worker.ingest(watermark(ORDERS, 3, 1500)).unwrap();
    let outputs = worker.ingest(watermark(PAYMENTS, 3, 1500)).unwrap();

    assert_eq!(joined_rows(&outputs), vec![(0, 3, 1, "late".to_string())]);
    assert_eq!(join.metrics().late_records, 0);
}

#[test]
fn test_sliding_window_joins_each_covering_window() {
    let join = running(config(JoinStrategy::Hash, WindowType::sliding(1000, 500)));
    let mut worker = join.worker().unwrap();

    worker.ingest(orders(ORDERS, 1, &[(1, 600, 10), (2, 100, 20)])).unwrap();
    worker
        .ingest(payments(PAYMENTS, 1, &[(1, 900, "a"), (2, 1100, "b")]))
        .unwrap();
    worker.ingest(watermark(ORDERS, 2, 2000)).unwrap();
    let outputs = worker.ingest(watermark(PAYMENTS, 2, 2000)).unwrap();

    // (1, 600) x (1, 900) share [0, 1000) and [500, 1500); (2, 100) x (2, 1100) share none
    let windows: Vec<WindowId> = outputs.iter().map(|o| o.window).collect();
    assert_eq!(
        windows,
        vec![WindowId::new(0, 1000), WindowId::new(500, 1500)]
    );
    assert_eq!(
        joined_rows(&outputs),
        vec![
            (0, 1, 10, "a".to_string()),
            (500, 1, 10, "a".to_string())
        ]
    );
    let sequences: Vec<u64> = outputs.iter().map(|o| o.sequence.sequence_number).collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[test]
fn test_strategies_produce_same_matches() {
    let run = |strategy| {
        let join = running(config(strategy, WindowType::sliding(400, 200)));
        let mut worker = join.worker().unwrap();
        let left: Vec<(i64, i64, i64)> = (0..60).map(|i| (i % 4, i * 17 % 1000, i)).collect();
        let right: Vec<(i64, i64, &str)> = (0..45)
            .map(|i| (i % 3, i * 23 % 1000, if i % 2 == 0 { "even" } else { "odd" }))
            .collect();

        worker.ingest(orders(ORDERS, 1, &left)).unwrap();
        worker.ingest(payments(PAYMENTS, 1, &right)).unwrap();
        let mut outputs = worker.ingest(watermark(ORDERS, 2, 5000)).unwrap();
        outputs.extend(worker.ingest(watermark(PAYMENTS, 2, 5000)).unwrap());
        joined_rows(&outputs)
    };

    let nested = run(JoinStrategy::NestedLoop);
    let hash = run(JoinStrategy::Hash);
    assert!(!nested.is_empty());
    assert_eq!(nested, hash);
}

#[test]
fn test_residual_filter() {
    let join = running(
        StreamJoinConfig::builder()
            .left_key_column("order_id")
            .right_key_column("order_id")
            .left_schema(orders_schema())
            .right_schema(payments_schema())
            .left_time(TimeFunction::event_time("ts"))
            .right_time(TimeFunction::event_time("ts"))
            .left_origins([ORDERS])
            .right_origins([PAYMENTS])
            .window(WindowType::tumbling(1000))
            .strategy(JoinStrategy::Hash)
            .filter(|order, payment| order.timestamp <= payment.timestamp)
            .build(),
    );
    let mut worker = join.worker().unwrap();

    worker
        .ingest(orders(ORDERS, 1, &[(1, 100, 1), (1, 500, 2)]))
        .unwrap();
    worker
        .ingest(payments(PAYMENTS, 1, &[(1, 300, "ok")]))
        .unwrap();
    let outputs = join.stop(TerminationType::Graceful).unwrap();
    assert_eq!(joined_rows(&outputs), vec![(0, 1, 1, "ok".to_string())]);
}

#[test]
fn test_concurrent_workers_emit_in_window_order() {
    init_tracing();
    const ROWS: i64 = 200;
    let left = [OriginId(1), OriginId(2)];
    let right = [OriginId(3), OriginId(4)];
    let join = running(
        StreamJoinConfig::builder()
            .left_key_column("order_id")
            .right_key_column("order_id")
            .left_schema(orders_schema())
            .right_schema(payments_schema())
            .left_time(TimeFunction::event_time("ts"))
            .right_time(TimeFunction::event_time("ts"))
            .left_origins(left)
            .right_origins(right)
            .window(WindowType::tumbling(500))
            .strategy(JoinStrategy::Hash)
            .build(),
    );

    let mut workers: Vec<_> = (0..4).map(|_| join.worker().unwrap()).collect();
    let outputs: Vec<JoinOutput> = thread::scope(|scope| {
        let handles: Vec<_> = workers
            .iter_mut()
            .zip(left.iter().chain(right.iter()).copied())
            .map(|(worker, origin)| {
                let is_left = left.contains(&origin);
                scope.spawn(move || {
                    let mut outputs = Vec::new();
                    for j in 0..ROWS {
                        let sequence = j as u64 + 1;
                        let element = if is_left {
                            orders(origin, sequence, &[(j % 5, j * 10, j)])
                        } else {
                            payments(origin, sequence, &[(j % 5, j * 10, "p")])
                        };
                        outputs.extend(worker.ingest(element).unwrap());
                    }
                    outputs.extend(
                        worker
                            .ingest(watermark(origin, ROWS as u64 + 1, 10_000))
                            .unwrap(),
                    );
                    outputs
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    });

    // 4 windows, 5 keys, 20 left x 20 right rows per key and window
    let total: usize = outputs.iter().map(|o| o.batch.num_rows()).sum();
    assert_eq!(total, 4 * 5 * 20 * 20);

    let mut ordered: Vec<(u64, i64)> = outputs
        .iter()
        .map(|o| (o.sequence.sequence_number, o.window.end))
        .collect();
    ordered.sort_unstable();
    assert_eq!(ordered, vec![(1, 500), (2, 1000), (3, 1500), (4, 2000)]);
    assert_eq!(join.metrics().slices_disposed, 4);
}

#[test]
fn test_unordered_emission_numbers_outputs_contiguously() {
    let join = running(
        StreamJoinConfig::builder()
            .left_key_column("order_id")
            .right_key_column("order_id")
            .left_schema(orders_schema())
            .right_schema(payments_schema())
            .left_time(TimeFunction::event_time("ts"))
            .right_time(TimeFunction::event_time("ts"))
            .left_origins([ORDERS])
            .right_origins([PAYMENTS])
            .window(WindowType::tumbling(100))
            .emit_ordering(EmitOrdering::Unordered)
            .build(),
    );
    let mut worker = join.worker().unwrap();
    worker
        .ingest(orders(ORDERS, 1, &[(1, 10, 1), (1, 150, 2), (1, 250, 3)]))
        .unwrap();
    worker
        .ingest(payments(PAYMENTS, 1, &[(1, 20, "a"), (1, 260, "c")]))
        .unwrap();

    let outputs = join.stop(TerminationType::Graceful).unwrap();
    let sequences: Vec<u64> = outputs.iter().map(|o| o.sequence.sequence_number).collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[test]
fn test_schema_mismatch_is_counted() {
    let join = running(config(JoinStrategy::NestedLoop, WindowType::tumbling(1000)));
    let mut worker = join.worker().unwrap();

    // A payments batch on the orders origin
    let element = match payments(PAYMENTS, 1, &[(1, 1, "x")]) {
        StreamElement::Records(mut buffer) => {
            buffer.origin = ORDERS;
            StreamElement::Records(buffer)
        }
        StreamElement::Watermark(_) => unreachable!(),
    };
    assert!(worker.ingest(element).unwrap().is_empty());
    assert_eq!(join.metrics().rejected_batches, 1);
    assert_eq!(join.metrics().left_records, 0);

    // The sequence position is still consumed
    worker.ingest(orders(ORDERS, 2, &[(1, 5, 5)])).unwrap();
    assert_eq!(join.metrics().left_records, 1);
}

#[test]
fn test_graceful_and_hard_stop() {
    for (termination, expected) in [
        (TerminationType::Graceful, 1),
        (TerminationType::HardStop, 0),
        (TerminationType::Failure, 0),
    ] {
        let join = running(config(JoinStrategy::Hash, WindowType::tumbling(1000)));
        let mut worker = join.worker().unwrap();
        worker.ingest(orders(ORDERS, 1, &[(9, 10, 1)])).unwrap();
        worker.ingest(payments(PAYMENTS, 1, &[(9, 20, "x")])).unwrap();
        // Buffered behind a gap; dropped on every termination
        worker.ingest(orders(ORDERS, 3, &[(9, 30, 2)])).unwrap();

        let outputs = join.stop(termination).unwrap();
        assert_eq!(outputs.len(), expected, "{termination}");
        assert_eq!(join.state(), OperatorState::Stopped);
        assert!(worker.ingest(watermark(ORDERS, 2, 0)).is_err());
    }
}

#[test]
fn test_null_keys_are_counted() {
    let schema = Arc::new(Schema::new(vec![
        Field::new("order_id", DataType::Int64, true),
        Field::new("ts", DataType::Int64, false),
        Field::new("amount", DataType::Int64, false),
    ]));
    let join = running(
        StreamJoinConfig::builder()
            .left_key_column("order_id")
            .right_key_column("order_id")
            .left_schema(Arc::clone(&schema))
            .right_schema(payments_schema())
            .left_time(TimeFunction::event_time("ts"))
            .right_time(TimeFunction::event_time("ts"))
            .left_origins([ORDERS])
            .right_origins([PAYMENTS])
            .build(),
    );
    let mut worker = join.worker().unwrap();
    let ids = Int64Array::from(vec![Some(1), None]);
    assert_eq!(ids.null_count(), 1);
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(Int64Array::from(vec![1, 2])),
            Arc::new(Int64Array::from(vec![1, 2])),
        ],
    )
    .unwrap();
    worker
        .ingest(RecordBuffer::new(ORDERS, SequenceData::single(1), 0, batch).into())
        .unwrap();

    let metrics = join.metrics();
    assert_eq!(metrics.left_records, 1);
    assert_eq!(metrics.invalid_records, 1);
}
