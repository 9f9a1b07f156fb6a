//! Stream batch → Online Store ingestion
//!
//! ## Pipeline
//!
//! 1. **Transform**: the view's transformation, if any, runs over the batch
//! 2. **Conform**: schema columns are type-checked and coerced
//! 3. **Aggregate**: the [`AggregationEngine`] applies the watermark and
//!    updates the windows of every touched entity key
//! 4. **Materialize**: the resulting rows are written to the online store
//!
//! Batches of the same view are processed one at a time, in arrival order.
//! Different views ingest concurrently.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let pipeline = IngestPipeline::new(store, IngestConfig::default());
//! let result = pipeline.push(&view, &join_keys, batch).await?;
//! println!("{} rows accepted, {} late", result.rows_accepted, result.late_rows_dropped);
//! ```

use crate::observability;
use featurestream_core::validation::conform_batch;
use featurestream_core::{
    recover_mutex, AggregationEngine, OnlineStore, OnlineWriteConfig, Result, RowBatch,
    StreamFeatureView, ViewStats,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Ingestion configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Storage-level expiry for written rows (None = no expiration)
    pub write_ttl: Option<Duration>,
    /// Update the entity keys of one batch in parallel
    pub parallel: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            write_ttl: None,
            parallel: true,
        }
    }
}

/// Ingest result with metrics
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub feature_view: String,
    pub rows_received: usize,
    pub rows_accepted: usize,
    /// Rows behind the watermark; dropped, not an error
    pub late_rows_dropped: usize,
    /// Rows written to the online store (0 for offline-only views)
    pub rows_materialized: usize,
    pub duration: Duration,
}

/// Runs pushed batches through transform, aggregation and materialization
pub struct IngestPipeline {
    engine: AggregationEngine,
    online_store: Arc<dyn OnlineStore>,
    config: IngestConfig,
    /// One async lock per view so batches of a view never interleave
    view_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IngestPipeline {
    pub fn new(online_store: Arc<dyn OnlineStore>, config: IngestConfig) -> Self {
        Self {
            engine: AggregationEngine::new().with_parallel(config.parallel),
            online_store,
            config,
            view_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn online_store(&self) -> &Arc<dyn OnlineStore> {
        &self.online_store
    }

    /// Ingests one batch for `view`
    ///
    /// `join_keys` are the resolved join keys of the view's entities. A batch
    /// that violates the transform or the view schema fails with
    /// `SchemaMismatch` and leaves all state untouched.
    pub async fn push(
        &self,
        view: &StreamFeatureView,
        join_keys: &[String],
        batch: RowBatch,
    ) -> Result<IngestResult> {
        let start = Instant::now();
        let _timer = observability::time_ingest(&view.name);

        let lock = self.view_lock(&view.name)?;
        let _guard = lock.lock().await;

        let result = self.run(view, join_keys, batch).await;
        if let Err(e) = &result {
            observability::increment_ingest_errors(&view.name);
            tracing::warn!(view = %view.name, error = %e, "Ingest failed");
        }
        let (rows_received, rows_accepted, late_rows_dropped, rows_materialized) = result?;

        observability::record_ingest(
            &view.name,
            rows_received,
            late_rows_dropped,
            rows_materialized,
        );

        let duration = start.elapsed();
        tracing::debug!(
            view = %view.name,
            rows = rows_received,
            accepted = rows_accepted,
            late = late_rows_dropped,
            materialized = rows_materialized,
            duration_ms = duration.as_millis() as u64,
            store = self.online_store.store_type(),
            "Ingest complete"
        );

        Ok(IngestResult {
            feature_view: view.name.clone(),
            rows_received,
            rows_accepted,
            late_rows_dropped,
            rows_materialized,
            duration,
        })
    }

    /// Counters of a view's aggregation state
    pub fn stats(&self, view: &str) -> Option<ViewStats> {
        self.engine.stats(view)
    }

    /// Discards a view's windows and watermark
    pub fn reset_view(&self, view: &str) -> Result<bool> {
        self.engine.reset(view)
    }

    async fn run(
        &self,
        view: &StreamFeatureView,
        join_keys: &[String],
        batch: RowBatch,
    ) -> Result<(usize, usize, usize, usize)> {
        let batch = match &view.transform {
            Some(transform) => transform.apply(&batch)?,
            None => batch,
        };
        let batch = conform_batch(batch, view, join_keys)?;

        let outcome = self.engine.ingest(view, join_keys, &batch)?;
        let materialized = outcome.materialized.len();

        if materialized > 0 {
            let write_config = OnlineWriteConfig {
                ttl: self.config.write_ttl,
            };
            self.online_store
                .write_online_features(&view.name, outcome.materialized, write_config)
                .await?;
        }

        Ok((
            outcome.rows_received,
            outcome.rows_accepted,
            outcome.late_rows_dropped,
            materialized,
        ))
    }

    fn view_lock(&self, view: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = recover_mutex(&self.view_locks, "IngestPipeline")?;
        Ok(Arc::clone(locks.entry(view.to_string()).or_default()))
    }
}
