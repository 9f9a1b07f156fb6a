//! Online feature serving
//!
//! [`get_online_features`] turns feature references (`view:feature`) and
//! entity rows into a column-oriented [`OnlineResponse`].
//!
//! Every reference is resolved against one registry snapshot before the
//! online store is touched; an unknown view or feature, or an entity row that
//! lacks a join key (or holds a null or list key), fails the whole request. Missing or stale records are
//! not errors: they serve null.

use crate::observability;
use chrono::{DateTime, Utc};
use featurestream_core::{
    EntityKey, Error, FeatureValue, OnlineStore, Result, StreamFeatureView,
};
use featurestream_registry::RegistrySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Separator of `view__feature` column names and `<column>__ts` timestamp columns
pub const COLUMN_SEPARATOR: &str = "__";

/// A parsed `view:feature` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureRef {
    pub feature_view: String,
    pub feature: String,
}

impl FeatureRef {
    pub fn new(feature_view: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            feature_view: feature_view.into(),
            feature: feature.into(),
        }
    }

    /// Parses `view:feature`; both parts must be non-empty
    pub fn parse(reference: &str) -> Result<Self> {
        match reference.split_once(':') {
            Some((view, feature))
                if !view.is_empty() && !feature.is_empty() && !feature.contains(':') =>
            {
                Ok(Self::new(view, feature))
            }
            _ => Err(Error::InvalidFeatureReference(reference.to_string())),
        }
    }

    /// Output column name of this feature
    pub fn column_name(&self, full_feature_names: bool) -> String {
        if full_feature_names {
            format!("{}{}{}", self.feature_view, COLUMN_SEPARATOR, self.feature)
        } else {
            self.feature.clone()
        }
    }
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.feature_view, self.feature)
    }
}

/// Request options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineRequestOptions {
    /// Name feature columns `view__feature` instead of `feature`
    pub full_feature_names: bool,
}

/// One served feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub name: String,
    pub values: Vec<FeatureValue>,
    /// Event timestamp of each served value (None where the value is null
    /// because no live record exists)
    pub event_timestamps: Vec<Option<DateTime<Utc>>>,
}

/// Column-oriented result of an online read
///
/// Join-key columns come first, in the order they were first needed by the
/// requested views, carrying the caller's own values. Feature columns follow
/// in request order. Every column has one value per entity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineResponse {
    pub entity_columns: Vec<(String, Vec<FeatureValue>)>,
    pub features: Vec<FeatureVector>,
    num_rows: usize,
}

impl OnlineResponse {
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Column names: join keys, features, then (optionally) `<feature>__ts`
    pub fn column_names(&self, include_event_timestamps: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .entity_columns
            .iter()
            .map(|(name, _)| name.clone())
            .chain(self.features.iter().map(|f| f.name.clone()))
            .collect();
        if include_event_timestamps {
            names.extend(self.features.iter().map(|f| timestamp_column(&f.name)));
        }
        names
    }

    /// Values of a join-key or feature column
    pub fn column(&self, name: &str) -> Option<&[FeatureValue]> {
        self.entity_columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, values)| values.as_slice())
            .or_else(|| self.feature(name).map(|f| f.values.as_slice()))
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureVector> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Column name → values
    ///
    /// With `include_event_timestamps`, every feature column gets a
    /// companion `<feature>__ts` column of timestamps (null where the
    /// feature is null for lack of a record).
    pub fn to_dict(&self, include_event_timestamps: bool) -> HashMap<String, Vec<FeatureValue>> {
        let mut dict: HashMap<String, Vec<FeatureValue>> = self
            .entity_columns
            .iter()
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();

        for feature in &self.features {
            dict.insert(feature.name.clone(), feature.values.clone());
            if include_event_timestamps {
                let timestamps = feature
                    .event_timestamps
                    .iter()
                    .map(|ts| ts.map_or(FeatureValue::Null, FeatureValue::Timestamp))
                    .collect();
                dict.insert(timestamp_column(&feature.name), timestamps);
            }
        }
        dict
    }
}

fn timestamp_column(feature_column: &str) -> String {
    format!("{}{}ts", feature_column, COLUMN_SEPARATOR)
}

/// A requested view with its resolved join keys and wanted features
struct ResolvedView<'a> {
    view: &'a StreamFeatureView,
    join_keys: Vec<String>,
    /// (position in the request, feature name)
    features: Vec<(usize, String)>,
}

/// True if a record stamped `event_time` is past the view's TTL at `now`
///
/// A missing or zero TTL never expires.
pub fn is_expired(ttl: Option<Duration>, event_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let Some(ttl) = ttl.filter(|ttl| !ttl.is_zero()) else {
        return false;
    };
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now.signed_duration_since(event_time) > ttl,
        Err(_) => false,
    }
}

/// Reads the latest feature values for a set of entity rows
///
/// Resolution errors (`InvalidFeatureReference`, `FeatureViewNotFound`,
/// `FeatureColumnNotFound`, `MissingEntityColumn`, `InvalidInput` for null
/// or list key values) are raised before any lookup; no partial response is ever returned.
pub async fn get_online_features<S: AsRef<str>>(
    snapshot: &RegistrySnapshot,
    online_store: &dyn OnlineStore,
    feature_refs: &[S],
    entity_rows: &[HashMap<String, FeatureValue>],
    options: &OnlineRequestOptions,
) -> Result<OnlineResponse> {
    let _timer = observability::time_online_read();

    let refs = feature_refs
        .iter()
        .map(|r| FeatureRef::parse(r.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let resolved = resolve(snapshot, &refs)?;

    // Output names must be unique
    let mut names: Vec<String> = Vec::with_capacity(refs.len());
    for feature_ref in &refs {
        let name = feature_ref.column_name(options.full_feature_names);
        if names.contains(&name) {
            return Err(Error::invalid_input(format!(
                "feature column '{}' is requested more than once{}",
                name,
                if options.full_feature_names {
                    ""
                } else {
                    " (use full feature names to disambiguate)"
                }
            )));
        }
        names.push(name);
    }

    // Join-key columns in first-seen order
    let mut join_key_columns: Vec<String> = Vec::new();
    for view in &resolved {
        for key in &view.join_keys {
            if !join_key_columns.contains(key) {
                join_key_columns.push(key.clone());
            }
        }
    }

    for row in entity_rows {
        for key in &join_key_columns {
            match row.get(key) {
                None => return Err(Error::MissingEntityColumn(key.clone())),
                Some(value) if !value.is_join_key_value() => {
                    return Err(Error::invalid_input(format!(
                        "entity column '{}' has {} value, expected a non-null scalar",
                        key,
                        value.type_name()
                    )))
                }
                Some(_) => {}
            }
        }
    }

    let mut features: Vec<Option<FeatureVector>> = vec![None; refs.len()];
    let now = Utc::now();

    for view in &resolved {
        let keys: Vec<Vec<EntityKey>> = entity_rows
            .iter()
            .map(|row| {
                view.join_keys
                    .iter()
                    .map(|k| EntityKey::from_value(k.clone(), &row[k]))
                    .collect()
            })
            .collect();

        let records = online_store
            .get_online_features(&view.view.name, &keys)
            .await?;
        if records.len() != keys.len() {
            return Err(Error::internal(format!(
                "{} store returned {} records for {} keys of '{}'",
                online_store.store_type(),
                records.len(),
                keys.len(),
                view.view.name
            )));
        }

        let live: Vec<_> = records
            .into_iter()
            .map(|record| record.filter(|r| !is_expired(view.view.ttl, r.timestamp, now)))
            .collect();

        for (position, feature) in &view.features {
            let mut values = Vec::with_capacity(live.len());
            let mut event_timestamps = Vec::with_capacity(live.len());
            for record in &live {
                match record {
                    Some(row) => {
                        values.push(row.get_feature(feature).cloned().unwrap_or(FeatureValue::Null));
                        event_timestamps.push(Some(row.timestamp));
                    }
                    None => {
                        values.push(FeatureValue::Null);
                        event_timestamps.push(None);
                    }
                }
            }
            features[*position] = Some(FeatureVector {
                name: names[*position].clone(),
                values,
                event_timestamps,
            });
        }
    }

    let entity_columns = join_key_columns
        .into_iter()
        .map(|key| {
            let values = entity_rows.iter().map(|row| row[&key].clone()).collect();
            (key, values)
        })
        .collect();

    let features: Vec<FeatureVector> = features.into_iter().flatten().collect();
    if features.len() != refs.len() {
        return Err(Error::internal("unresolved feature column in online response"));
    }

    tracing::debug!(
        features = refs.len(),
        views = resolved.len(),
        rows = entity_rows.len(),
        "Served online features"
    );

    Ok(OnlineResponse {
        entity_columns,
        features,
        num_rows: entity_rows.len(),
    })
}

fn resolve<'a>(snapshot: &'a RegistrySnapshot, refs: &[FeatureRef]) -> Result<Vec<ResolvedView<'a>>> {
    let mut resolved: Vec<ResolvedView<'a>> = Vec::new();

    for (position, feature_ref) in refs.iter().enumerate() {
        let index = match resolved
            .iter()
            .position(|r| r.view.name == feature_ref.feature_view)
        {
            Some(index) => index,
            None => {
                let view = snapshot
                    .stream_feature_view(&feature_ref.feature_view)
                    .ok_or_else(|| Error::FeatureViewNotFound(feature_ref.feature_view.clone()))?;
                let join_keys = snapshot.join_keys(view)?;
                resolved.push(ResolvedView {
                    view,
                    join_keys,
                    features: Vec::new(),
                });
                resolved.len() - 1
            }
        };

        let entry = &mut resolved[index];
        if !entry
            .view
            .feature_columns(&entry.join_keys)
            .contains(&feature_ref.feature)
        {
            return Err(Error::FeatureColumnNotFound(
                feature_ref.feature.clone(),
                feature_ref.feature_view.clone(),
            ));
        }
        entry.features.push((position, feature_ref.feature.clone()));
    }

    Ok(resolved)
}
