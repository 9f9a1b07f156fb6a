//! The `FeatureStore` facade
//!
//! Ties the registry, the ingestion pipeline and the online store together
//! behind the operations a client uses: `apply`, the `list_*`/`get_*` reads,
//! `push` for stream batches and `get_online_features` for serving.

use crate::config::{self, FeatureStoreConfig};
use crate::ingest::{IngestConfig, IngestPipeline, IngestResult};
use crate::memory_store::InMemoryOnlineStore;
use crate::observability;
use crate::serving::{self, OnlineRequestOptions, OnlineResponse};
use featurestream_core::{
    Entity, Error, FeatureValue, OnlineStore, Result, RowBatch, StreamFeatureView, ViewStats,
};
use featurestream_registry::{
    ApplyReport, ChangeAction, FeatureRegistry, ObjectKind, RegistryObject,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Registration and online serving of stream features
pub struct FeatureStore {
    config: FeatureStoreConfig,
    registry: FeatureRegistry,
    pipeline: IngestPipeline,
}

impl FeatureStore {
    /// Builds a store from configuration, creating the online store it names
    pub async fn new(config: FeatureStoreConfig) -> Result<Self> {
        let online_store: Arc<dyn OnlineStore> = match config.online_store.store_type.as_str() {
            "memory" => Arc::new(InMemoryOnlineStore::new()),
            other => {
                return Err(Error::config(format!(
                    "unsupported online store type '{}' (expected 'memory')",
                    other
                )))
            }
        };
        Self::with_online_store(config, online_store).await
    }

    /// Builds a store around a caller-provided online store
    pub async fn with_online_store(
        config: FeatureStoreConfig,
        online_store: Arc<dyn OnlineStore>,
    ) -> Result<Self> {
        let registry = FeatureRegistry::new(config.registry_config()).await?;
        let pipeline = IngestPipeline::new(
            online_store,
            IngestConfig {
                write_ttl: config.write_ttl(),
                parallel: config.ingestion.parallel,
            },
        );

        info!(
            project = %config.project,
            registry = %config.registry.path,
            online_store = pipeline.online_store().store_type(),
            "Feature store ready"
        );

        Ok(Self {
            config,
            registry,
            pipeline,
        })
    }

    /// In-memory registry and online store
    pub async fn in_memory() -> Result<Self> {
        Self::new(FeatureStoreConfig::default()).await
    }

    /// Loads `featurestream.yaml`-style configuration from `path`
    pub async fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::load(path).map_err(|e| Error::config(format!("{:#}", e)))?;
        Self::new(config).await
    }

    pub fn project(&self) -> &str {
        &self.config.project
    }

    pub fn config(&self) -> &FeatureStoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn online_store(&self) -> &Arc<dyn OnlineStore> {
        self.pipeline.online_store()
    }

    /// Registers or updates definitions (upsert-only, all or nothing)
    ///
    /// Aggregation state of every view whose definition, or one of whose
    /// entities, changed is discarded; windows rebuild from the next batch.
    pub async fn apply(&self, objects: Vec<RegistryObject>) -> Result<ApplyReport> {
        let report = match self.registry.apply(objects).await {
            Ok(report) => report,
            Err(e) => {
                observability::record_apply(if e.is_validation() {
                    "rejected"
                } else {
                    "failed"
                });
                return Err(e);
            }
        };

        if report.is_noop() {
            observability::record_apply("noop");
            return Ok(report);
        }
        observability::record_apply("changed");

        let updated = |kind: ObjectKind| -> HashSet<&str> {
            report
                .changes
                .iter()
                .filter(|c| c.kind == kind && c.action == ChangeAction::Update)
                .map(|c| c.name.as_str())
                .collect()
        };
        let updated_views = updated(ObjectKind::StreamFeatureView);
        let updated_entities = updated(ObjectKind::Entity);

        if !updated_views.is_empty() || !updated_entities.is_empty() {
            let snapshot = self.registry.snapshot()?;
            for view in snapshot.stream_feature_views() {
                let affected = updated_views.contains(view.name.as_str())
                    || view
                        .entities
                        .iter()
                        .any(|e| updated_entities.contains(e.as_str()));
                if affected {
                    self.pipeline.reset_view(&view.name)?;
                }
            }
        }

        Ok(report)
    }

    pub fn list_entities(&self) -> Result<Vec<Entity>> {
        self.registry.list_entities()
    }

    pub fn list_stream_feature_views(&self) -> Result<Vec<StreamFeatureView>> {
        self.registry.list_stream_feature_views()
    }

    pub fn get_entity(&self, name: &str) -> Result<Entity> {
        self.registry.get_entity(name)
    }

    pub fn get_stream_feature_view(&self, name: &str) -> Result<StreamFeatureView> {
        self.registry.get_stream_feature_view(name)
    }

    /// Ingests one stream batch into a registered view
    pub async fn push(&self, feature_view: &str, batch: RowBatch) -> Result<IngestResult> {
        let snapshot = self.registry.snapshot()?;
        let view = snapshot
            .stream_feature_view(feature_view)
            .ok_or_else(|| Error::FeatureViewNotFound(feature_view.to_string()))?;
        let join_keys = snapshot.join_keys(view)?;

        self.pipeline.push(view, &join_keys, batch).await
    }

    /// Serves the latest feature values for `entity_rows`
    ///
    /// See [`serving::get_online_features`].
    pub async fn get_online_features<S: AsRef<str>>(
        &self,
        feature_refs: &[S],
        entity_rows: &[HashMap<String, FeatureValue>],
        options: &OnlineRequestOptions,
    ) -> Result<OnlineResponse> {
        let snapshot = self.registry.snapshot()?;
        serving::get_online_features(
            &snapshot,
            self.pipeline.online_store().as_ref(),
            feature_refs,
            entity_rows,
            options,
        )
        .await
    }

    /// Aggregation counters of a view, `None` before its first batch
    pub fn ingest_stats(&self, feature_view: &str) -> Option<ViewStats> {
        self.pipeline.stats(feature_view)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.registry.snapshot()?;
        self.pipeline.online_store().health_check().await
    }
}
