//! Stream feature view definitions
//!
//! A [`StreamFeatureView`] ties together the entities it is keyed by, the
//! stream it reads, the schema of the rows it accepts, an optional row
//! transformation, and the windowed aggregations it materializes.
//!
//! ## Feature columns
//!
//! The features a view serves are, in order:
//!
//! 1. the output name of each aggregation
//! 2. every schema field that is not an aggregation input, an aggregation
//!    output, a join key or the timestamp field ("passthrough" columns)
//!
//! Passthrough columns carry the value of the most recent row per key.

use crate::{
    Aggregation, DataSource, Entity, Error, Field, Result, Transformation, ValueType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A feature view computed from a stream source
///
/// Equality is structural over every field, including the transform.
///
/// # Example
///
/// ```
/// use featurestream_core::{
///     Aggregation, AggregationFunction, Field, MessageFormat, StreamFeatureView, StreamSource,
///     ValueType,
/// };
/// use std::time::Duration;
///
/// let source = StreamSource::new("kafka", "trips", "event_timestamp", MessageFormat::Json {
///     schema_json: String::new(),
/// });
///
/// let view = StreamFeatureView::new("driver_trips", source)
///     .with_entities(["driver"])
///     .with_schema(vec![Field::new("trips", ValueType::Int64)])
///     .with_aggregation(
///         Aggregation::new("trips", AggregationFunction::Sum, Duration::from_secs(3600))
///             .with_name("trips_1h"),
///     )
///     .with_timestamp_field("event_timestamp");
///
/// assert_eq!(view.feature_columns(&["driver_id".to_string()]), vec!["trips_1h"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFeatureView {
    pub name: String,

    /// Entity names, resolved against the registry
    pub entities: Vec<String>,

    /// Ordered row schema; names are unique
    pub schema: Vec<Field>,

    #[serde(default)]
    pub aggregations: Vec<Aggregation>,

    /// Maximum age of a served value; `None` never expires
    #[serde(default)]
    pub ttl: Option<Duration>,

    pub timestamp_field: String,

    pub source: DataSource,

    /// Row transformation applied before aggregation
    #[serde(default)]
    pub transform: Option<Transformation>,

    /// Execution mode tag, passed through to the execution engine
    #[serde(default)]
    pub mode: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Materialize results to the online store
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

impl StreamFeatureView {
    /// Creates a view reading from `source`
    ///
    /// The timestamp field defaults to the source's.
    pub fn new(name: impl Into<String>, source: impl Into<DataSource>) -> Self {
        let source = source.into();
        Self {
            name: name.into(),
            entities: Vec::new(),
            schema: Vec::new(),
            aggregations: Vec::new(),
            ttl: None,
            timestamp_field: source.timestamp_field().to_string(),
            source,
            transform: None,
            mode: String::new(),
            description: String::new(),
            owner: String::new(),
            tags: BTreeMap::new(),
            online: true,
        }
    }

    /// Creates a view named after its transformation
    pub fn from_transform(transform: Transformation, source: impl Into<DataSource>) -> Self {
        let name = transform.name.clone();
        Self::new(name, source).with_transform(transform)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schema(mut self, schema: Vec<Field>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn with_aggregations(mut self, aggregations: Vec<Aggregation>) -> Self {
        self.aggregations = aggregations;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }

    pub fn with_transform(mut self, transform: Transformation) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.schema.iter().find(|f| f.name == name)
    }

    /// Watermark of the stream source (zero for non-stream sources)
    pub fn watermark(&self) -> Duration {
        self.source
            .as_stream()
            .map(|s| s.watermark)
            .unwrap_or(Duration::ZERO)
    }

    /// Join keys of the view's entities, in entity order
    ///
    /// `resolve` looks an entity up by name; an unknown entity fails with
    /// `EntityNotFound`.
    pub fn join_keys<'a, F>(&self, resolve: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> Option<&'a Entity>,
    {
        let mut keys = Vec::new();
        for name in &self.entities {
            let entity = resolve(name).ok_or_else(|| Error::EntityNotFound(name.clone()))?;
            for key in &entity.join_keys {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        Ok(keys)
    }

    /// Schema fields served as-is (latest value per key)
    pub fn passthrough_fields<'a>(&'a self, join_keys: &[String]) -> Vec<&'a Field> {
        self.schema
            .iter()
            .filter(|f| {
                f.name != self.timestamp_field
                    && !join_keys.contains(&f.name)
                    && !self
                        .aggregations
                        .iter()
                        .any(|a| a.column == f.name || a.output_name() == f.name)
            })
            .collect()
    }

    /// Names of the features this view serves
    pub fn feature_columns(&self, join_keys: &[String]) -> Vec<String> {
        self.aggregations
            .iter()
            .map(|a| a.output_name().to_string())
            .chain(
                self.passthrough_fields(join_keys)
                    .into_iter()
                    .map(|f| f.name.clone()),
            )
            .collect()
    }

    /// Dtype of a served feature
    pub fn feature_dtype(&self, feature: &str, join_keys: &[String]) -> Option<ValueType> {
        if let Some(agg) = self.aggregations.iter().find(|a| a.output_name() == feature) {
            let input = self.field(&agg.column)?.dtype;
            return agg.function.output_type(input);
        }
        self.passthrough_fields(join_keys)
            .into_iter()
            .find(|f| f.name == feature)
            .map(|f| f.dtype)
    }
}
