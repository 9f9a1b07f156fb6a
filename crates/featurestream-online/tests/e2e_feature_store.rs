//! End-to-end tests for the feature store facade
//!
//! Register → push → serve, with everything in process:
//! - SQLite registry (in memory or on disk via tempfile)
//! - In-memory online store
//!
//! Run with: `cargo test -p featurestream-online --test e2e_feature_store`

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use featurestream_core::{
    Aggregation, AggregationFunction, BatchSource, Entity, Error, Expr, FeatureValue, Field,
    MessageFormat, RowBatch, StreamFeatureView, StreamSource, Transformation, ValueType,
};
use featurestream_online::{FeatureStore, FeatureStoreConfig, OnlineRequestOptions};
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn driver_entity() -> Entity {
    Entity::new("driver_entity", vec!["test_key"])
}

fn stream_source() -> StreamSource {
    StreamSource::new(
        "kafka",
        "test_path",
        "event_timestamp",
        MessageFormat::Avro {
            schema_json: "{}".to_string(),
        },
    )
    .with_batch_source(BatchSource::new("test_path", "event_timestamp"))
    .with_watermark(Duration::from_secs(3600))
}

fn simple_sfv() -> StreamFeatureView {
    StreamFeatureView::new("simple_sfv", stream_source())
        .with_entities(["driver_entity"])
        .with_schema(vec![Field::new("dummy_field", ValueType::Float32)])
        .with_aggregation(Aggregation::new(
            "dummy_field",
            AggregationFunction::Max,
            Duration::from_secs(86_400),
        ))
        .with_aggregation(
            Aggregation::new(
                "dummy_field",
                AggregationFunction::Count,
                Duration::from_secs(86_400),
            )
            .with_name("dummy_field_count"),
        )
        .with_online(true)
}

fn entity_row(key: impl Into<FeatureValue>) -> HashMap<String, FeatureValue> {
    HashMap::from([("test_key".to_string(), key.into())])
}

fn dummy_batch(keys: &[i64], values: &[f64], times: &[DateTime<Utc>]) -> RowBatch {
    RowBatch::builder()
        .column("test_key", keys.iter().map(|k| FeatureValue::Int(*k)).collect())
        .column("dummy_field", values.iter().map(|v| FeatureValue::Float(*v)).collect())
        .column(
            "event_timestamp",
            times.iter().map(|t| FeatureValue::Timestamp(*t)).collect(),
        )
        .build()
        .unwrap()
}

async fn registered_store() -> FeatureStore {
    let store = FeatureStore::in_memory().await.unwrap();
    store
        .apply(vec![driver_entity().into(), simple_sfv().into()])
        .await
        .unwrap();
    store
}

// ============================================================================
// Serving
// ============================================================================

#[tokio::test]
async fn test_e2e_unseen_key_serves_null() {
    // Given: a registered view that never received a row
    let store = registered_store().await;

    // When
    let response = store
        .get_online_features(
            &["simple_sfv:dummy_field"],
            &[entity_row(1001i64)],
            &OnlineRequestOptions::default(),
        )
        .await
        .unwrap();

    // Then: the key is echoed and the feature is null, not zero
    let expected = HashMap::from([
        ("test_key".to_string(), vec![FeatureValue::Int(1001)]),
        ("dummy_field".to_string(), vec![FeatureValue::Null]),
    ]);
    assert_eq!(response.to_dict(false), expected);
    assert_eq!(response.num_rows(), 1);
}

#[tokio::test]
async fn test_e2e_push_then_serve() {
    // Given
    let store = registered_store().await;

    // When: values 1, 5, 3 arrive for key 1001
    let result = store
        .push(
            "simple_sfv",
            dummy_batch(&[1001, 1001, 1001], &[1.0, 5.0, 3.0], &[at(0), at(60), at(120)]),
        )
        .await
        .unwrap();
    assert_eq!(result.rows_accepted, 3);
    assert_eq!(result.rows_materialized, 1);

    // Then: max and count are served; an unseen key stays null
    let response = store
        .get_online_features(
            &["simple_sfv:dummy_field", "simple_sfv:dummy_field_count"],
            &[entity_row(1001i64), entity_row(1002i64)],
            &OnlineRequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.column_names(true),
        vec![
            "test_key",
            "dummy_field",
            "dummy_field_count",
            "dummy_field__ts",
            "dummy_field_count__ts"
        ]
    );
    let dict = response.to_dict(true);
    assert_eq!(
        dict["dummy_field"],
        vec![FeatureValue::Float(5.0), FeatureValue::Null]
    );
    assert_eq!(
        dict["dummy_field_count"],
        vec![FeatureValue::Int(3), FeatureValue::Null]
    );
    assert_eq!(
        dict["dummy_field__ts"],
        vec![FeatureValue::Timestamp(at(120)), FeatureValue::Null]
    );
}

#[tokio::test]
async fn test_caller_key_values_are_echoed_unchanged() {
    let store = registered_store().await;
    store
        .push("simple_sfv", dummy_batch(&[1001], &[2.5], &[at(0)]))
        .await
        .unwrap();

    // A string "1001" addresses the same record as the integer key
    let response = store
        .get_online_features(
            &["simple_sfv:dummy_field"],
            &[entity_row("1001")],
            &OnlineRequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.column("test_key").unwrap(),
        &[FeatureValue::String("1001".to_string())]
    );
    assert_eq!(
        response.column("dummy_field").unwrap(),
        &[FeatureValue::Float(2.5)]
    );
}

#[tokio::test]
async fn test_full_feature_names() {
    let store = registered_store().await;
    let options = OnlineRequestOptions {
        full_feature_names: true,
    };

    let response = store
        .get_online_features(&["simple_sfv:dummy_field"], &[entity_row(1i64)], &options)
        .await
        .unwrap();

    assert_eq!(
        response.column_names(false),
        vec!["test_key", "simple_sfv__dummy_field"]
    );
}

#[tokio::test]
async fn test_duplicate_output_column_is_rejected() {
    // Two views serving a feature of the same name
    let store = registered_store().await;
    store
        .apply(vec![simple_sfv().with_name("other_sfv").into()])
        .await
        .unwrap();
    let refs = ["simple_sfv:dummy_field", "other_sfv:dummy_field"];

    let err = store
        .get_online_features(&refs, &[entity_row(1i64)], &OnlineRequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    // Full names disambiguate
    let response = store
        .get_online_features(
            &refs,
            &[entity_row(1i64)],
            &OnlineRequestOptions {
                full_feature_names: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(response.features.len(), 2);
}

#[tokio::test]
async fn test_unresolvable_requests_fail_fast() {
    let store = registered_store().await;
    let options = OnlineRequestOptions::default();
    let rows = [entity_row(1001i64)];

    let err = store
        .get_online_features(&["missing_view:dummy_field"], &rows, &options)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FeatureViewNotFound(ref v) if v == "missing_view"));

    // A bad reference anywhere in the list fails the whole request
    let err = store
        .get_online_features(
            &["simple_sfv:dummy_field", "simple_sfv:nope"],
            &rows,
            &options,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FeatureColumnNotFound(ref f, _) if f == "nope"));

    let err = store
        .get_online_features(&["dummy_field"], &rows, &options)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidFeatureReference(_)));

    let err = store
        .get_online_features(
            &["simple_sfv:dummy_field"],
            &[HashMap::from([("driver_id".to_string(), FeatureValue::Int(1))])],
            &options,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingEntityColumn(ref k) if k == "test_key"));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_ttl_exceeded_serves_null() {
    // Given: a view whose values expire after one minute
    let store = FeatureStore::in_memory().await.unwrap();
    store
        .apply(vec![
            driver_entity().into(),
            simple_sfv().with_ttl(Duration::from_secs(60)).into(),
        ])
        .await
        .unwrap();

    // When: key 1 was last seen two hours ago and key 2 just now
    let now = Utc::now();
    store
        .push(
            "simple_sfv",
            dummy_batch(&[1, 2], &[1.0, 2.0], &[now - ChronoDuration::hours(2), now]),
        )
        .await
        .unwrap();

    // Then
    let response = store
        .get_online_features(
            &["simple_sfv:dummy_field"],
            &[entity_row(1i64), entity_row(2i64)],
            &OnlineRequestOptions::default(),
        )
        .await
        .unwrap();
    let feature = response.feature("dummy_field").unwrap();
    assert_eq!(feature.values, vec![FeatureValue::Null, FeatureValue::Float(2.0)]);
    assert_eq!(feature.event_timestamps, vec![None, Some(now)]);
}

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_late_rows_never_reach_the_online_store() {
    let store = registered_store().await;
    store
        .push("simple_sfv", dummy_batch(&[7], &[1.0], &[at(86_000)]))
        .await
        .unwrap();

    // More than the 1h watermark behind the newest event
    let result = store
        .push("simple_sfv", dummy_batch(&[7], &[100.0], &[at(0)]))
        .await
        .unwrap();
    assert_eq!(result.late_rows_dropped, 1);

    let response = store
        .get_online_features(
            &["simple_sfv:dummy_field"],
            &[entity_row(7i64)],
            &OnlineRequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.column("dummy_field").unwrap(),
        &[FeatureValue::Float(1.0)]
    );

    let stats = store.ingest_stats("simple_sfv").unwrap();
    assert_eq!(stats.late_rows_dropped, 1);
    assert_eq!(stats.watermark_high, Some(at(86_000)));
}

#[tokio::test]
async fn test_updated_view_starts_from_fresh_state() {
    let store = registered_store().await;
    store
        .push("simple_sfv", dummy_batch(&[7], &[1.0], &[at(0)]))
        .await
        .unwrap();
    assert!(store.ingest_stats("simple_sfv").is_some());

    store
        .apply(vec![simple_sfv().with_owner("new-owner").into()])
        .await
        .unwrap();

    assert!(store.ingest_stats("simple_sfv").is_none());
}

#[tokio::test]
async fn test_push_with_wrong_dtype_is_schema_mismatch() {
    let store = registered_store().await;
    let batch = RowBatch::builder()
        .column("test_key", vec![FeatureValue::Int(1)])
        .column("dummy_field", vec![FeatureValue::String("high".into())])
        .column("event_timestamp", vec![FeatureValue::Timestamp(at(0))])
        .build()
        .unwrap();

    let err = store.push("simple_sfv", batch).await.unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch(_)));
    assert!(store.ingest_stats("simple_sfv").is_none());
}

#[tokio::test]
async fn test_null_entity_keys_never_share_a_record() {
    let store = registered_store().await;

    // A null join key cannot be stored under any entity
    let batch = RowBatch::builder()
        .column("test_key", vec![FeatureValue::Null])
        .column("dummy_field", vec![FeatureValue::Float(9.0)])
        .column("event_timestamp", vec![FeatureValue::Timestamp(at(0))])
        .build()
        .unwrap();
    let err = store.push("simple_sfv", batch).await.unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch(ref msg) if msg.contains("test_key")));
    assert!(store.ingest_stats("simple_sfv").is_none());

    // ...nor be looked up
    let err = store
        .get_online_features(
            &["simple_sfv:dummy_field"],
            &[entity_row(FeatureValue::Null)],
            &OnlineRequestOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    // The string "null" is an ordinary key with nothing stored
    let response = store
        .get_online_features(
            &["simple_sfv:dummy_field"],
            &[entity_row("null")],
            &OnlineRequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.column("dummy_field").unwrap(),
        &[FeatureValue::Null]
    );
}

// ============================================================================
// Transform round-trip and persistence
// ============================================================================

fn pandas_view() -> StreamFeatureView {
    let transform = Transformation::new("pandas_view")
        .with_inputs(["A", "B"])
        .with_output("A", Expr::add(Expr::column("A"), Expr::literal(10i64)))
        .with_output("B", Expr::add(Expr::column("B"), Expr::literal(10i64)))
        .with_output("C", Expr::literal(20.2))
        .keep_inputs(true);

    StreamFeatureView::from_transform(transform, stream_source())
        .with_entities(["driver_entity"])
        .with_schema(vec![
            Field::new("A", ValueType::Int64),
            Field::new("B", ValueType::Int64),
            Field::new("C", ValueType::Float64),
        ])
}

fn pandas_input() -> RowBatch {
    RowBatch::builder()
        .column("test_key", vec![1i64.into(), 2i64.into()])
        .column("A", vec![1i64.into(), 2i64.into()])
        .column("B", vec![10i64.into(), 20i64.into()])
        .column("event_timestamp", vec![at(0).into(), at(1).into()])
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_stored_transform_reproduces_declared_output() {
    // Given: a registry on disk
    let temp_dir = TempDir::new().unwrap();
    let config = FeatureStoreConfig::default()
        .with_registry_path(temp_dir.path().join("registry.db").to_string_lossy());

    let declared = pandas_view();
    let expected = declared.transform.as_ref().unwrap().apply(&pandas_input()).unwrap();

    {
        let store = FeatureStore::new(config.clone()).await.unwrap();
        store
            .apply(vec![driver_entity().into(), declared.clone().into()])
            .await
            .unwrap();
    }

    // When: the definition is read back by a fresh store
    let store = FeatureStore::new(config).await.unwrap();
    let stored = store.get_stream_feature_view("pandas_view").unwrap();

    // Then: it is structurally equal and its transform gives the same rows
    assert_eq!(stored, declared);
    let actual = stored.transform.as_ref().unwrap().apply(&pandas_input()).unwrap();
    assert_eq!(actual, expected);

    // And: pushing through the stored definition serves transformed values
    store.push("pandas_view", pandas_input()).await.unwrap();
    let response = store
        .get_online_features(
            &["pandas_view:A", "pandas_view:B", "pandas_view:C"],
            &[entity_row(1i64), entity_row(2i64)],
            &OnlineRequestOptions::default(),
        )
        .await
        .unwrap();
    let dict = response.to_dict(false);
    assert_eq!(dict["A"], vec![FeatureValue::Int(11), FeatureValue::Int(12)]);
    assert_eq!(dict["B"], vec![FeatureValue::Int(20), FeatureValue::Int(30)]);
    assert_eq!(
        dict["C"],
        vec![FeatureValue::Float(20.2), FeatureValue::Float(20.2)]
    );
}

#[tokio::test]
async fn test_store_from_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let registry_path = temp_dir.path().join("registry.db");
    let config_path = temp_dir.path().join("featurestream.yaml");
    std::fs::write(
        &config_path,
        format!(
            "project: driver_ranking\nregistry:\n  path: {:?}\ningestion:\n  parallel: false\n",
            registry_path.to_string_lossy()
        ),
    )
    .unwrap();

    let store = FeatureStore::from_config_file(&config_path).await.unwrap();
    assert_eq!(store.project(), "driver_ranking");
    assert!(!store.config().ingestion.parallel);

    let report = store
        .apply(vec![driver_entity().into(), simple_sfv().into()])
        .await
        .unwrap();
    assert_eq!(report.created(), 2);

    // Applying the same objects again is a no-op with one copy of each
    let report = store
        .apply(vec![driver_entity().into(), simple_sfv().into()])
        .await
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(store.list_entities().unwrap(), vec![driver_entity()]);
    assert_eq!(store.list_stream_feature_views().unwrap(), vec![simple_sfv()]);
    assert!(registry_path.exists());
}
