//! End-to-End Tests for the in-process stream pipeline
//!
//! Drives a batch through the same stages the online crate uses:
//! - Transformation (expression graph)
//! - Batch conformance against the view schema
//! - Windowed aggregation with watermark handling
//! - Online key encoding of the materialized rows

use chrono::{DateTime, TimeZone, Utc};
use featurestream_core::validation::{conform_batch, validate_stream_feature_view};
use featurestream_core::{
    build_online_key, Aggregation, AggregationEngine, AggregationFunction, BatchSource, Entity,
    Error, Expr, FeatureValue, Field, MessageFormat, RowBatch, StreamFeatureView, StreamSource,
    Transformation, ValueType,
};
use std::time::Duration;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn driver() -> Entity {
    Entity::new("driver_entity", vec!["test_key"])
}

fn stream_source(watermark: Duration) -> StreamSource {
    StreamSource::new(
        "kafka",
        "test_path",
        "event_timestamp",
        MessageFormat::Avro {
            schema_json: "{}".to_string(),
        },
    )
    .with_bootstrap_servers("")
    .with_batch_source(BatchSource::new("test_path", "event_timestamp"))
    .with_watermark(watermark)
}

fn join_keys() -> Vec<String> {
    vec!["test_key".to_string()]
}

// ============================================================================
// Aggregation correctness
// ============================================================================

#[test]
fn test_max_and_count_over_one_day_window() {
    // Given: a view with max and count over dummy_field in a 1-day window
    let view = StreamFeatureView::new("simple_sfv", stream_source(Duration::from_secs(86_400)))
        .with_entities(["driver_entity"])
        .with_schema(vec![Field::new("dummy_field", ValueType::Float32)])
        .with_aggregation(Aggregation::new(
            "dummy_field",
            AggregationFunction::Max,
            Duration::from_secs(86_400),
        ))
        .with_aggregation(
            Aggregation::new("dummy_field", AggregationFunction::Count, Duration::from_secs(86_400))
                .with_name("dummy_field_count"),
        );
    let d = driver();
    validate_stream_feature_view(&view, |name| (name == d.name).then_some(&d)).unwrap();

    // When: values 1, 5, 3 arrive for key 1001 within the window
    let batch = RowBatch::builder()
        .column("test_key", vec![1001i64.into(), 1001i64.into(), 1001i64.into()])
        .column("dummy_field", vec![1i64.into(), 5i64.into(), 3i64.into()])
        .column(
            "event_timestamp",
            vec![at(0).into(), at(60).into(), at(120).into()],
        )
        .build()
        .unwrap();
    let batch = conform_batch(batch, &view, &join_keys()).unwrap();

    let engine = AggregationEngine::new();
    let outcome = engine.ingest(&view, &join_keys(), &batch).unwrap();

    // Then: max is 5 (as float32 column) and count is 3
    assert_eq!(outcome.materialized.len(), 1);
    let row = &outcome.materialized[0];
    assert_eq!(row.get_feature("dummy_field"), Some(&FeatureValue::Float(5.0)));
    assert_eq!(row.get_feature("dummy_field_count"), Some(&FeatureValue::Int(3)));
    assert_eq!(row.timestamp, at(120));
    assert_eq!(
        build_online_key(&view.name, &row.entities),
        "simple_sfv:test_key=1001"
    );

    // And: an event more than a day later pushes the old values out
    let later = RowBatch::builder()
        .column("test_key", vec![1001i64.into()])
        .column("dummy_field", vec![2.0.into()])
        .column("event_timestamp", vec![at(86_400 + 61).into()])
        .build()
        .unwrap();
    let outcome = engine.ingest(&view, &join_keys(), &later).unwrap();
    let row = &outcome.materialized[0];
    assert_eq!(row.get_feature("dummy_field"), Some(&FeatureValue::Float(3.0)));
    assert_eq!(row.get_feature("dummy_field_count"), Some(&FeatureValue::Int(2)));
}

// ============================================================================
// Watermark
// ============================================================================

#[test]
fn test_rows_behind_watermark_do_not_affect_aggregates() {
    // Given: a 10 minute watermark
    let view = StreamFeatureView::new("driver_sum", stream_source(Duration::from_secs(600)))
        .with_entities(["driver_entity"])
        .with_schema(vec![Field::new("trips", ValueType::Int64)])
        .with_aggregation(Aggregation::new(
            "trips",
            AggregationFunction::Sum,
            Duration::from_secs(86_400),
        ));
    let engine = AggregationEngine::new();

    // When: a row one hour behind the newest timestamp arrives in a later batch
    let first = RowBatch::builder()
        .column("test_key", vec![1i64.into()])
        .column("trips", vec![10i64.into()])
        .column("event_timestamp", vec![at(3600).into()])
        .build()
        .unwrap();
    engine.ingest(&view, &join_keys(), &first).unwrap();

    let late = RowBatch::builder()
        .column("test_key", vec![1i64.into(), 1i64.into()])
        .column("trips", vec![1000i64.into(), 5i64.into()])
        .column("event_timestamp", vec![at(0).into(), at(3300).into()])
        .build()
        .unwrap();
    let outcome = engine.ingest(&view, &join_keys(), &late).unwrap();

    // Then: the late row is counted, not aggregated; the in-watermark row is
    assert_eq!(outcome.late_rows_dropped, 1);
    assert_eq!(outcome.rows_accepted, 1);
    assert_eq!(
        outcome.materialized[0].get_feature("trips"),
        Some(&FeatureValue::Int(15))
    );

    let stats = engine.stats("driver_sum").unwrap();
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.rows_received, 3);
    assert_eq!(stats.late_rows_dropped, 1);
}

// ============================================================================
// Transform stage
// ============================================================================

fn plus_ten_transform() -> Transformation {
    Transformation::new("pandas_view")
        .with_inputs(["A", "B"])
        .with_output("A", Expr::add(Expr::column("A"), Expr::literal(10i64)))
        .with_output("B", Expr::add(Expr::column("B"), Expr::literal(10i64)))
        .with_output("C", Expr::literal(20.2))
        .keep_inputs(true)
}

#[test]
fn test_transform_then_aggregate_passthrough() {
    // Given: a view with no aggregations fed through a +10 transform
    let view = StreamFeatureView::from_transform(
        plus_ten_transform(),
        stream_source(Duration::from_secs(60)),
    )
    .with_entities(["driver_entity"])
    .with_schema(vec![
        Field::new("A", ValueType::Int64),
        Field::new("B", ValueType::Int64),
        Field::new("C", ValueType::Float64),
    ]);
    assert_eq!(view.name, "pandas_view");

    let input = RowBatch::builder()
        .column("test_key", vec![1i64.into(), 2i64.into()])
        .column("A", vec![1i64.into(), 2i64.into()])
        .column("B", vec![10i64.into(), 20i64.into()])
        .column("event_timestamp", vec![at(0).into(), at(1).into()])
        .build()
        .unwrap();

    // When: the transform output is conformed and ingested
    let transformed = view.transform.as_ref().unwrap().apply(&input).unwrap();
    let conformed = conform_batch(transformed, &view, &join_keys()).unwrap();
    let outcome = AggregationEngine::new()
        .ingest(&view, &join_keys(), &conformed)
        .unwrap();

    // Then: each key serves the transformed values
    assert_eq!(outcome.materialized.len(), 2);
    let second = &outcome.materialized[1];
    assert_eq!(second.get_feature("A"), Some(&FeatureValue::Int(12)));
    assert_eq!(second.get_feature("B"), Some(&FeatureValue::Int(30)));
    assert_eq!(second.get_feature("C"), Some(&FeatureValue::Float(20.2)));
}

#[test]
fn test_transform_output_missing_schema_column_is_schema_mismatch() {
    // Given: a schema expecting a column the transform never produces
    let view = StreamFeatureView::from_transform(
        plus_ten_transform(),
        stream_source(Duration::from_secs(60)),
    )
    .with_entities(["driver_entity"])
    .with_schema(vec![Field::new("D", ValueType::Int64)]);

    let input = RowBatch::builder()
        .column("test_key", vec![1i64.into()])
        .column("A", vec![1i64.into()])
        .column("B", vec![1i64.into()])
        .column("event_timestamp", vec![at(0).into()])
        .build()
        .unwrap();

    // When/Then: conformance fails with a schema mismatch naming the column
    let transformed = view.transform.as_ref().unwrap().apply(&input).unwrap();
    let err = conform_batch(transformed, &view, &join_keys()).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch(ref msg) if msg.contains("'D'")));
}

#[test]
fn test_transform_survives_serialization_with_the_view() {
    let view = StreamFeatureView::from_transform(
        plus_ten_transform(),
        stream_source(Duration::from_secs(60)),
    )
    .with_entities(["driver_entity"]);

    let json = serde_json::to_string(&view).unwrap();
    let restored: StreamFeatureView = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, view);

    let input = RowBatch::builder()
        .column("A", vec![1i64.into()])
        .column("B", vec![2i64.into()])
        .build()
        .unwrap();
    let expected = view.transform.as_ref().unwrap().apply(&input).unwrap();
    let actual = restored.transform.as_ref().unwrap().apply(&input).unwrap();
    assert_eq!(actual, expected);
    assert_eq!(actual.column_names(), vec!["A", "B", "C"]);
}
