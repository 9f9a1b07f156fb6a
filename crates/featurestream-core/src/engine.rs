//! Windowed aggregation engine
//!
//! The engine keeps per-view, per-entity-key window state and turns incoming
//! row batches into materialized [`FeatureRow`]s.
//!
//! ## Ingest steps
//!
//! 1. **Check**: the batch must carry the timestamp field, every join key and
//!    every aggregation column, every timestamp must be a timestamp value and
//!    every join-key value a non-null scalar. Nothing is mutated when this
//!    fails.
//! 2. **Watermark**: rows are examined in batch order. A row older than
//!    `highest_seen - watermark` is dropped and counted; otherwise the highest
//!    seen timestamp advances. The watermark is tracked per view.
//! 3. **Group**: accepted rows are grouped by entity key, keeping batch order
//!    inside each group.
//! 4. **Aggregate**: groups are processed in parallel (rayon). Each key's
//!    state sits behind its own mutex.
//! 5. **Materialize**: one row per touched key with every aggregation output
//!    and the passthrough columns of the key's most recent row, stamped with
//!    that row's event timestamp. Skipped for views with `online = false`.
//!
//! When a view's definition changes between batches its state is discarded
//! and rebuilt from the next batch.
//!
//! A key whose newest row is older than `watermark_high - watermark - widest
//! window` is evicted when the watermark advances: any row it could still
//! accept would evict its whole window and replace its passthrough values,
//! so it is indistinguishable from a fresh key.

use crate::validation::check_join_key_column;
use crate::window::WindowBuffer;
use crate::{
    recover_mutex, recover_read, recover_write, EntityKey, Error, FeatureRow, FeatureValue,
    Result, RowBatch, StreamFeatureView,
};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Result of ingesting one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
    pub rows_received: usize,
    pub rows_accepted: usize,
    /// Rows older than the view's watermark; not an error
    pub late_rows_dropped: usize,
    /// One row per touched entity key (empty for offline-only views)
    pub materialized: Vec<FeatureRow>,
}

/// Running counters for one view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewStats {
    pub batches: u64,
    pub rows_received: u64,
    pub rows_accepted: u64,
    pub late_rows_dropped: u64,
    pub keys_tracked: usize,
    /// Idle keys dropped from memory so far
    pub keys_evicted: u64,
    /// Highest event timestamp accepted so far
    pub watermark_high: Option<DateTime<Utc>>,
}

type KeyTuple = Vec<EntityKey>;

#[derive(Debug)]
struct KeyState {
    windows: Vec<WindowBuffer>,
    /// Passthrough values of the most recent row and its timestamp
    latest: Option<(DateTime<Utc>, Vec<FeatureValue>)>,
}

#[derive(Debug)]
struct ViewState {
    definition: StreamFeatureView,
    join_keys: Vec<String>,
    /// Held for the whole ingest; one batch at a time per view
    progress: Mutex<ViewStats>,
    keys: RwLock<HashMap<KeyTuple, Arc<Mutex<KeyState>>>>,
}

impl ViewState {
    fn new(definition: StreamFeatureView, join_keys: Vec<String>) -> Self {
        Self {
            definition,
            join_keys,
            progress: Mutex::new(ViewStats::default()),
            keys: RwLock::new(HashMap::new()),
        }
    }

    fn new_key_state(&self) -> KeyState {
        KeyState {
            windows: self
                .definition
                .aggregations
                .iter()
                .map(|a| WindowBuffer::new(a.function, a.time_window))
                .collect(),
            latest: None,
        }
    }

    /// Drops keys that no future accepted row can aggregate with
    fn evict_idle_keys(&self, high: DateTime<Utc>, watermark: chrono::Duration) -> Result<usize> {
        let widest = self
            .definition
            .aggregations
            .iter()
            .map(|a| a.time_window)
            .max()
            .unwrap_or_default();
        let Some(cutoff) = chrono::Duration::from_std(widest)
            .ok()
            .and_then(|w| w.checked_add(&watermark))
            .and_then(|horizon| high.checked_sub_signed(horizon))
        else {
            return Ok(0);
        };

        let mut keys = recover_write(&self.keys, "AggregationEngine keys")?;
        let before = keys.len();
        keys.retain(|_, handle| match handle.lock() {
            Ok(key_state) => key_state
                .latest
                .as_ref()
                .map_or(true, |(latest, _)| *latest >= cutoff),
            Err(_) => true,
        });
        Ok(before - keys.len())
    }
}

/// Column positions resolved once per batch
struct BatchLayout {
    timestamp: usize,
    join_keys: Vec<usize>,
    aggregations: Vec<usize>,
    /// `None` when the passthrough column is absent (served as null)
    passthrough: Vec<Option<usize>>,
}

/// Stateful windowed aggregation over stream feature views
///
/// # Example
///
/// ```
/// use featurestream_core::{
///     Aggregation, AggregationEngine, AggregationFunction, FeatureValue, Field, MessageFormat,
///     RowBatch, StreamFeatureView, StreamSource, ValueType,
/// };
/// use chrono::{TimeZone, Utc};
/// use std::time::Duration;
///
/// let source = StreamSource::new("kafka", "trips", "ts", MessageFormat::Json {
///     schema_json: String::new(),
/// });
/// let view = StreamFeatureView::new("trips", source)
///     .with_entities(["driver"])
///     .with_schema(vec![Field::new("trips", ValueType::Int64)])
///     .with_aggregation(Aggregation::new("trips", AggregationFunction::Max, Duration::from_secs(60)));
///
/// let ts = |s| FeatureValue::Timestamp(Utc.timestamp_opt(s, 0).unwrap());
/// let batch = RowBatch::builder()
///     .column("driver_id", vec![1i64.into(), 1i64.into()])
///     .column("trips", vec![3i64.into(), 7i64.into()])
///     .column("ts", vec![ts(0), ts(1)])
///     .build()
///     .unwrap();
///
/// let engine = AggregationEngine::new();
/// let outcome = engine.ingest(&view, &["driver_id".to_string()], &batch).unwrap();
/// assert_eq!(outcome.materialized[0].get_feature("trips"), Some(&FeatureValue::Int(7)));
/// ```
#[derive(Debug)]
pub struct AggregationEngine {
    views: RwLock<HashMap<String, Arc<ViewState>>>,
    parallel: bool,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregationEngine {
    pub fn new() -> Self {
        Self {
            views: RwLock::new(HashMap::new()),
            parallel: true,
        }
    }

    /// Disables rayon fan-out across entity keys
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Ingests one batch for `view`
    ///
    /// `join_keys` are the resolved join keys of the view's entities.
    pub fn ingest(
        &self,
        view: &StreamFeatureView,
        join_keys: &[String],
        batch: &RowBatch,
    ) -> Result<IngestOutcome> {
        let layout = self.layout(view, join_keys, batch)?;
        let timestamps = row_timestamps(view, batch, layout.timestamp)?;
        for key in join_keys {
            check_join_key_column(batch, view, key)?;
        }

        let state = self.view_state(view, join_keys)?;
        let mut progress = recover_mutex(&state.progress, "AggregationEngine view")?;

        // Watermark pass, in batch order
        let watermark = chrono::Duration::from_std(view.watermark())
            .unwrap_or_else(|_| chrono::Duration::max_value());
        let mut high = progress.watermark_high;
        let mut accepted = Vec::with_capacity(batch.num_rows());
        let mut late = 0usize;
        for (row, ts) in timestamps.iter().enumerate() {
            let is_late = high
                .and_then(|h| h.checked_sub_signed(watermark))
                .map(|cutoff| *ts < cutoff)
                .unwrap_or(false);
            if is_late {
                late += 1;
                continue;
            }
            if high.map_or(true, |h| *ts > h) {
                high = Some(*ts);
            }
            accepted.push(row);
        }

        // Group by entity key, preserving batch order
        let mut groups: Vec<(KeyTuple, Vec<usize>)> = Vec::new();
        let mut group_index: HashMap<KeyTuple, usize> = HashMap::new();
        for &row in &accepted {
            let key: KeyTuple = join_keys
                .iter()
                .zip(&layout.join_keys)
                .map(|(name, &col)| EntityKey::from_value(name.clone(), batch.value_at(row, col)))
                .collect();
            match group_index.get(&key) {
                Some(&i) => groups[i].1.push(row),
                None => {
                    group_index.insert(key.clone(), groups.len());
                    groups.push((key, vec![row]));
                }
            }
        }

        let handles = self.key_states(&state, &groups)?;

        let update = |((key, rows), handle): (&(KeyTuple, Vec<usize>), &Arc<Mutex<KeyState>>)|
         -> Result<Option<FeatureRow>> {
            let mut key_state = recover_mutex(handle, "AggregationEngine key")?;
            for &row in rows {
                let ts = timestamps[row];
                for (window, &col) in key_state.windows.iter_mut().zip(&layout.aggregations) {
                    window.insert(ts, batch.value_at(row, col).clone());
                }
                let newer = key_state.latest.as_ref().map_or(true, |(latest, _)| ts >= *latest);
                if newer {
                    let values = layout
                        .passthrough
                        .iter()
                        .map(|col| col.map_or(FeatureValue::Null, |c| batch.value_at(row, c).clone()))
                        .collect();
                    key_state.latest = Some((ts, values));
                }
            }
            Ok(materialize(view, join_keys, key, &key_state))
        };

        let pairs: Vec<_> = groups.iter().zip(handles.iter()).collect();
        let rows: Vec<Option<FeatureRow>> = if self.parallel {
            pairs.into_par_iter().map(update).collect::<Result<_>>()?
        } else {
            pairs.into_iter().map(update).collect::<Result<_>>()?
        };

        let evicted = match high {
            Some(h) if progress.watermark_high.map_or(true, |prev| h > prev) => {
                state.evict_idle_keys(h, watermark)?
            }
            _ => 0,
        };
        if evicted > 0 {
            debug!(view = %view.name, evicted, "Evicted idle entity keys");
        }

        progress.batches += 1;
        progress.keys_evicted += evicted as u64;
        progress.rows_received += batch.num_rows() as u64;
        progress.rows_accepted += accepted.len() as u64;
        progress.late_rows_dropped += late as u64;
        progress.watermark_high = high;
        progress.keys_tracked = recover_read(&state.keys, "AggregationEngine keys")?.len();

        if late > 0 {
            debug!(
                view = %view.name,
                late_rows = late,
                watermark_high = ?high,
                "Dropped rows behind the watermark"
            );
            if late * 2 > batch.num_rows() {
                warn!(
                    view = %view.name,
                    late_rows = late,
                    rows = batch.num_rows(),
                    "More than half of the batch arrived behind the watermark"
                );
            }
        }

        let materialized: Vec<FeatureRow> = if view.online {
            rows.into_iter().flatten().collect()
        } else {
            Vec::new()
        };

        debug!(
            view = %view.name,
            rows = batch.num_rows(),
            accepted = accepted.len(),
            keys = groups.len(),
            materialized = materialized.len(),
            "Ingested batch"
        );

        Ok(IngestOutcome {
            rows_received: batch.num_rows(),
            rows_accepted: accepted.len(),
            late_rows_dropped: late,
            materialized,
        })
    }

    /// Counters for a view, `None` if it never received a batch
    pub fn stats(&self, view: &str) -> Option<ViewStats> {
        let views = recover_read(&self.views, "AggregationEngine").ok()?;
        let state = views.get(view)?;
        let stats = recover_mutex(&state.progress, "AggregationEngine view").ok()?;
        Some(stats.clone())
    }

    /// Discards all state of a view (windows, watermark, counters)
    pub fn reset(&self, view: &str) -> Result<bool> {
        let removed = recover_write(&self.views, "AggregationEngine")?
            .remove(view)
            .is_some();
        if removed {
            info!(view = %view, "Reset aggregation state");
        }
        Ok(removed)
    }

    fn layout(
        &self,
        view: &StreamFeatureView,
        join_keys: &[String],
        batch: &RowBatch,
    ) -> Result<BatchLayout> {
        let index = batch.column_index();
        let require = |column: &str| -> Result<usize> {
            index.get(column).copied().ok_or_else(|| {
                Error::schema_mismatch(format!(
                    "feature view '{}' requires column '{}' which is missing from the batch (columns: {:?})",
                    view.name,
                    column,
                    batch.column_names()
                ))
            })
        };

        Ok(BatchLayout {
            timestamp: require(view.timestamp_field.as_str())?,
            join_keys: join_keys
                .iter()
                .map(|k| require(k.as_str()))
                .collect::<Result<_>>()?,
            aggregations: view
                .aggregations
                .iter()
                .map(|a| require(a.column.as_str()))
                .collect::<Result<_>>()?,
            passthrough: view
                .passthrough_fields(join_keys)
                .iter()
                .map(|f| index.get(f.name.as_str()).copied())
                .collect(),
        })
    }

    /// Fetches the view's state, replacing it if the definition changed
    fn view_state(&self, view: &StreamFeatureView, join_keys: &[String]) -> Result<Arc<ViewState>> {
        if let Some(state) = recover_read(&self.views, "AggregationEngine")?.get(&view.name) {
            if state.definition == *view && state.join_keys == join_keys {
                return Ok(Arc::clone(state));
            }
        }

        let mut views = recover_write(&self.views, "AggregationEngine")?;
        if let Some(state) = views.get(&view.name) {
            if state.definition == *view && state.join_keys == join_keys {
                return Ok(Arc::clone(state));
            }
            info!(view = %view.name, "Feature view definition changed, resetting aggregation state");
        }
        let state = Arc::new(ViewState::new(view.clone(), join_keys.to_vec()));
        views.insert(view.name.clone(), Arc::clone(&state));
        Ok(state)
    }

    /// Per-key state handles for each group, creating missing ones
    fn key_states(
        &self,
        state: &ViewState,
        groups: &[(KeyTuple, Vec<usize>)],
    ) -> Result<Vec<Arc<Mutex<KeyState>>>> {
        {
            let keys = recover_read(&state.keys, "AggregationEngine keys")?;
            if groups.iter().all(|(key, _)| keys.contains_key(key)) {
                return Ok(groups.iter().filter_map(|(key, _)| keys.get(key).cloned()).collect());
            }
        }

        let mut keys = recover_write(&state.keys, "AggregationEngine keys")?;
        Ok(groups
            .iter()
            .map(|(key, _)| {
                Arc::clone(
                    keys.entry(key.clone())
                        .or_insert_with(|| Arc::new(Mutex::new(state.new_key_state()))),
                )
            })
            .collect())
    }
}

/// Reads every row's event timestamp, failing on non-timestamp values
fn row_timestamps(
    view: &StreamFeatureView,
    batch: &RowBatch,
    column: usize,
) -> Result<Vec<DateTime<Utc>>> {
    (0..batch.num_rows())
        .map(|row| {
            let value = batch.value_at(row, column);
            value.as_timestamp().ok_or_else(|| {
                Error::schema_mismatch(format!(
                    "feature view '{}': timestamp field '{}' has {} value on row {}",
                    view.name,
                    view.timestamp_field,
                    value.type_name(),
                    row
                ))
            })
        })
        .collect()
}

fn materialize(
    view: &StreamFeatureView,
    join_keys: &[String],
    key: &KeyTuple,
    state: &KeyState,
) -> Option<FeatureRow> {
    let (timestamp, passthrough) = state.latest.as_ref()?;
    let mut row = FeatureRow::new(key.clone(), *timestamp);
    for (agg, window) in view.aggregations.iter().zip(&state.windows) {
        row.add_feature(agg.output_name().to_string(), window.value());
    }
    for (field, value) in view.passthrough_fields(join_keys).iter().zip(passthrough) {
        row.add_feature(field.name.clone(), value.clone());
    }
    Some(row)
}
