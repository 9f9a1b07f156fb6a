//! End-to-end integration tests for the feature registry
//!
//! These tests validate apply workflows: creation, idempotence, updates,
//! referential integrity, atomic failure and persistence across restarts.

use anyhow::anyhow;
use async_trait::async_trait;
use featurestream_core::{
    Aggregation, AggregationFunction, BatchSource, Entity, Error, Expr, Field, MessageFormat,
    StreamFeatureView, StreamSource, Transformation, ValidationError, ValueType,
};
use featurestream_registry::{
    ChangeAction, FeatureRegistry, ObjectKind, RegistryBackend, RegistryConfig, SqliteBackend,
    StoredObject,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn driver_entity() -> Entity {
    Entity::new("driver_entity", vec!["test_key"]).with_description("Driver")
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
    .with_watermark(Duration::from_secs(86_400))
}

fn simple_sfv() -> StreamFeatureView {
    StreamFeatureView::from_transform(Transformation::identity("simple_sfv"), stream_source())
        .with_entities(["driver_entity"])
        .with_schema(vec![Field::new("dummy_field", ValueType::Float32)])
        .with_aggregation(Aggregation::new(
            "dummy_field",
            AggregationFunction::Max,
            Duration::from_secs(86_400),
        ))
        .with_ttl(Duration::from_secs(86_400))
        .with_mode("spark")
        .with_description("desc")
        .with_owner("test@example.com")
        .with_tag("key", "value")
}

#[tokio::test]
async fn test_e2e_apply_lifecycle() {
    // Given: A new registry on disk
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("registry.db");
    let registry = FeatureRegistry::new(RegistryConfig::sqlite(db_path.to_string_lossy()))
        .await
        .unwrap();

    // When: Apply an entity and a view that references it
    let report = registry
        .apply(vec![driver_entity().into(), simple_sfv().into()])
        .await
        .unwrap();

    // Then: Both are created and listed
    assert_eq!(report.created(), 2);
    assert_eq!(report.changes[1].kind, ObjectKind::StreamFeatureView);
    assert!(report.changes[1].transform_fingerprint.is_some());

    let views = registry.list_stream_feature_views().unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0], simple_sfv());
    assert_eq!(registry.list_entities().unwrap(), vec![driver_entity()]);

    // When: The same objects are applied again
    let report = registry
        .apply(vec![driver_entity().into(), simple_sfv().into()])
        .await
        .unwrap();

    // Then: Nothing changes
    assert!(report.is_noop());
    assert_eq!(registry.list_stream_feature_views().unwrap(), vec![simple_sfv()]);

    // When: The view is changed
    let changed = simple_sfv().with_ttl(Duration::from_secs(60));
    let report = registry.apply(vec![changed.clone().into()]).await.unwrap();

    // Then: It is replaced in place
    assert_eq!(report.changes[0].action, ChangeAction::Update);
    assert_eq!(
        registry.get_stream_feature_view("simple_sfv").unwrap().ttl,
        Some(Duration::from_secs(60))
    );
    assert_eq!(registry.list_stream_feature_views().unwrap().len(), 1);
}

#[tokio::test]
async fn test_apply_is_upsert_only() {
    let registry = FeatureRegistry::in_memory().await.unwrap();
    registry
        .apply(vec![driver_entity().into(), simple_sfv().into()])
        .await
        .unwrap();

    // Applying a second view without mentioning the first keeps both
    let other = simple_sfv().with_name("other_sfv");
    registry.apply(vec![other.into()]).await.unwrap();

    let names: Vec<String> = registry
        .list_stream_feature_views()
        .unwrap()
        .into_iter()
        .map(|v| v.name)
        .collect();
    assert_eq!(names, vec!["simple_sfv", "other_sfv"]);
}

#[tokio::test]
async fn test_view_with_unknown_entity_is_rejected() {
    let registry = FeatureRegistry::in_memory().await.unwrap();

    let err = registry.apply(vec![simple_sfv().into()]).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Validation(ValidationError::UnresolvedEntity { ref entity, .. })
            if entity == "driver_entity"
    ));
    assert!(registry.list_stream_feature_views().unwrap().is_empty());
}

#[tokio::test]
async fn test_view_can_use_previously_committed_entity() {
    let registry = FeatureRegistry::in_memory().await.unwrap();
    registry.apply(vec![driver_entity().into()]).await.unwrap();

    let report = registry.apply(vec![simple_sfv().into()]).await.unwrap();
    assert_eq!(report.created(), 1);
}

#[tokio::test]
async fn test_aggregation_on_column_outside_schema_rejects_whole_apply() {
    // Given: dummy_field2 is aggregated but not declared in the schema
    let registry = FeatureRegistry::in_memory().await.unwrap();
    let view = simple_sfv().with_aggregation(Aggregation::new(
        "dummy_field2",
        AggregationFunction::Count,
        Duration::from_secs(86_400),
    ));

    // When
    let err = registry
        .apply(vec![driver_entity().into(), view.into()])
        .await
        .unwrap_err();

    // Then: nothing was committed, not even the valid entity
    assert!(matches!(
        err,
        Error::Validation(ValidationError::UnknownAggregationColumn { ref column, .. })
            if column == "dummy_field2"
    ));
    assert!(registry.list_entities().unwrap().is_empty());
    assert!(registry.list_stream_feature_views().unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_source_is_rejected() {
    let registry = FeatureRegistry::in_memory().await.unwrap();
    let mut view = simple_sfv();
    view.source = BatchSource::new("test_path", "event_timestamp").into();

    let err = registry
        .apply(vec![driver_entity().into(), view.into()])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::NotAStreamSource { .. })
    ));
}

#[tokio::test]
async fn test_conflicting_duplicates_in_one_call() {
    let registry = FeatureRegistry::in_memory().await.unwrap();
    let err = registry
        .apply(vec![
            driver_entity().into(),
            simple_sfv().into(),
            simple_sfv().with_mode("flink").into(),
        ])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::DuplicateName { .. })
    ));

    // Identical duplicates collapse into one object
    let report = registry
        .apply(vec![
            driver_entity().into(),
            simple_sfv().into(),
            simple_sfv().into(),
        ])
        .await
        .unwrap();
    assert_eq!(report.changes.len(), 2);
}

#[tokio::test]
async fn test_entity_change_revalidates_committed_views() {
    // Given: a view whose aggregation output is "dummy_field"
    let registry = FeatureRegistry::in_memory().await.unwrap();
    registry
        .apply(vec![driver_entity().into(), simple_sfv().into()])
        .await
        .unwrap();

    // When: the entity's join key is renamed to collide with that output
    let err = registry
        .apply(vec![Entity::new("driver_entity", vec!["dummy_field"]).into()])
        .await
        .unwrap_err();

    // Then: the change is refused and the old entity stays
    assert!(err.is_validation());
    assert_eq!(
        registry.get_entity("driver_entity").unwrap().join_keys,
        vec!["test_key"]
    );
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("registry.db").to_string_lossy().to_string();

    let view = simple_sfv().with_transform(
        Transformation::new("simple_sfv")
            .with_inputs(["dummy_field"])
            .with_output(
                "dummy_field",
                Expr::add(Expr::column("dummy_field"), Expr::literal(10i64)),
            )
            .keep_inputs(true),
    );

    {
        let registry = FeatureRegistry::new(RegistryConfig::sqlite(path.clone()))
            .await
            .unwrap();
        registry
            .apply(vec![driver_entity().into(), view.clone().into()])
            .await
            .unwrap();
    }

    let reopened = FeatureRegistry::new(RegistryConfig::sqlite(path)).await.unwrap();
    assert_eq!(reopened.list_entities().unwrap(), vec![driver_entity()]);
    assert_eq!(reopened.get_stream_feature_view("simple_sfv").unwrap(), view);

    // Re-applying the reloaded definitions is a no-op
    let report = reopened
        .apply(vec![driver_entity().into(), view.into()])
        .await
        .unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_get_missing_objects() {
    let registry = FeatureRegistry::in_memory().await.unwrap();
    assert!(matches!(
        registry.get_stream_feature_view("nope"),
        Err(Error::FeatureViewNotFound(_))
    ));
    assert!(matches!(
        registry.get_entity("nope"),
        Err(Error::EntityNotFound(_))
    ));
}

/// Backend whose writes can be made to fail
struct FlakyBackend {
    inner: SqliteBackend,
    fail_writes: AtomicBool,
}

#[async_trait]
impl RegistryBackend for FlakyBackend {
    async fn init_schema(&self) -> anyhow::Result<()> {
        self.inner.init_schema().await
    }

    async fn upsert_objects(&self, objects: &[StoredObject]) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("disk full"));
        }
        self.inner.upsert_objects(objects).await
    }

    async fn load_objects(&self) -> anyhow::Result<Vec<StoredObject>> {
        self.inner.load_objects().await
    }
}

#[tokio::test]
async fn test_backend_failure_leaves_snapshot_untouched() {
    // Given: a registry with committed state
    let backend = Arc::new(FlakyBackend {
        inner: SqliteBackend::in_memory().unwrap(),
        fail_writes: AtomicBool::new(false),
    });
    let registry = FeatureRegistry::with_backend(backend.clone()).await.unwrap();
    registry
        .apply(vec![driver_entity().into(), simple_sfv().into()])
        .await
        .unwrap();

    // When: the backend fails during the next commit
    backend.fail_writes.store(true, Ordering::SeqCst);
    let err = registry
        .apply(vec![simple_sfv().with_owner("someone-else").into()])
        .await
        .unwrap_err();

    // Then: the error is a storage error and the snapshot is unchanged
    assert!(matches!(err, Error::StorageError(_)));
    assert_eq!(registry.list_stream_feature_views().unwrap(), vec![simple_sfv()]);
    assert_eq!(backend.load_objects().await.unwrap().len(), 2);
}
