//! Definition and row-batch validation
//!
//! Two kinds of checks live here:
//!
//! - **Definition checks** run when objects are applied to the registry and
//!   return [`ValidationError`]. They only look at the definitions themselves
//!   (plus entity resolution), never at data.
//! - **Batch conformance** runs when a batch reaches a view, after its
//!   transform: every schema column, join key and the timestamp field must be
//!   present, every value must fit its field's dtype and every join-key value
//!   must be a non-null scalar.

use crate::{
    Entity, Error, FeatureValue, Result, RowBatch, StreamFeatureView, ValidationError,
};
use crate::batch::Column;
use std::collections::HashSet;

type Check = std::result::Result<(), ValidationError>;

/// Checks an entity definition on its own
pub fn validate_entity(entity: &Entity) -> Check {
    if entity.name.trim().is_empty() {
        return Err(ValidationError::invalid(&entity.name, "entity name must not be empty"));
    }
    if entity.join_keys.is_empty() {
        return Err(ValidationError::invalid(
            &entity.name,
            "entity must declare at least one join key",
        ));
    }
    let mut seen = HashSet::new();
    for key in &entity.join_keys {
        if key.trim().is_empty() {
            return Err(ValidationError::invalid(&entity.name, "join key must not be empty"));
        }
        if !seen.insert(key.as_str()) {
            return Err(ValidationError::invalid(
                &entity.name,
                format!("join key '{}' is listed twice", key),
            ));
        }
    }
    Ok(())
}

/// Checks a stream feature view against its own definition and the entities
/// visible to it
///
/// `resolve` returns an entity by name from the proposed registry state
/// (committed entities plus the ones being applied alongside the view).
pub fn validate_stream_feature_view<'a, F>(view: &StreamFeatureView, resolve: F) -> Check
where
    F: Fn(&str) -> Option<&'a Entity>,
{
    let name = view.name.as_str();
    if name.trim().is_empty() {
        return Err(ValidationError::invalid(name, "feature view name must not be empty"));
    }

    if view.entities.is_empty() {
        return Err(ValidationError::invalid(
            name,
            "feature view must reference at least one entity",
        ));
    }
    let mut join_keys: Vec<&str> = Vec::new();
    for entity_name in &view.entities {
        let entity = resolve(entity_name).ok_or_else(|| ValidationError::UnresolvedEntity {
            view: name.to_string(),
            entity: entity_name.clone(),
        })?;
        join_keys.extend(entity.join_keys.iter().map(String::as_str));
    }

    if view.source.as_stream().is_none() {
        return Err(ValidationError::NotAStreamSource {
            view: name.to_string(),
            source_name: view.source.name().to_string(),
        });
    }

    if view.timestamp_field.trim().is_empty() {
        return Err(ValidationError::invalid(name, "timestamp_field must not be empty"));
    }

    let mut schema_names = HashSet::new();
    for field in &view.schema {
        if field.name.trim().is_empty() {
            return Err(ValidationError::invalid(name, "schema field name must not be empty"));
        }
        if !schema_names.insert(field.name.as_str()) {
            return Err(ValidationError::invalid(
                name,
                format!("schema field '{}' is declared twice", field.name),
            ));
        }
    }

    let mut outputs = HashSet::new();
    for agg in &view.aggregations {
        let field = view.field(&agg.column).ok_or_else(|| {
            ValidationError::UnknownAggregationColumn {
                view: name.to_string(),
                column: agg.column.clone(),
            }
        })?;

        if agg.time_window.is_zero() {
            return Err(ValidationError::invalid(
                name,
                format!("aggregation '{}' has a zero time window", agg.output_name()),
            ));
        }

        if agg.function.output_type(field.dtype).is_none() {
            return Err(ValidationError::invalid(
                name,
                format!(
                    "{} cannot be applied to column '{}' of type {}",
                    agg.function, agg.column, field.dtype
                ),
            ));
        }

        let output = agg.output_name();
        if !outputs.insert(output) {
            return Err(ValidationError::invalid(
                name,
                format!(
                    "aggregation output '{}' is produced more than once; give each aggregation a distinct name",
                    output
                ),
            ));
        }
        if join_keys.contains(&output) || output == view.timestamp_field {
            return Err(ValidationError::invalid(
                name,
                format!("aggregation output '{}' collides with a key column", output),
            ));
        }
    }

    // An output may reuse the name of an aggregated column, but not of a
    // column that would otherwise be served as-is.
    for output in outputs {
        let shadows_passthrough = view.field(output).is_some()
            && !view.aggregations.iter().any(|a| a.column == output);
        if shadows_passthrough {
            return Err(ValidationError::invalid(
                name,
                format!(
                    "aggregation output '{}' collides with schema column of the same name",
                    output
                ),
            ));
        }
    }

    Ok(())
}

/// Checks a (transformed) batch against a view and coerces its values
///
/// Required columns: every schema field, every join key and the timestamp
/// field. Schema values must be accepted by the field dtype and are coerced
/// to it; timestamps must be non-null timestamps; join-key values must be
/// non-null scalars. Columns outside the schema are carried along untouched.
pub fn conform_batch(
    batch: RowBatch,
    view: &StreamFeatureView,
    join_keys: &[String],
) -> Result<RowBatch> {
    let required = view
        .schema
        .iter()
        .map(|f| f.name.as_str())
        .chain(join_keys.iter().map(String::as_str))
        .chain(std::iter::once(view.timestamp_field.as_str()));

    for column in required {
        if !batch.has_column(column) {
            return Err(Error::schema_mismatch(format!(
                "feature view '{}' requires column '{}' which is missing from the batch (columns: {:?})",
                view.name,
                column,
                batch.column_names()
            )));
        }
    }

    for key in join_keys {
        check_join_key_column(&batch, view, key)?;
    }

    let mut columns = Vec::with_capacity(batch.columns().len());
    for column in batch.into_columns() {
        if column.name == view.timestamp_field {
            if let Some((row, value)) = column
                .values
                .iter()
                .enumerate()
                .find(|(_, v)| !matches!(v, FeatureValue::Timestamp(_)))
            {
                return Err(Error::schema_mismatch(format!(
                    "feature view '{}': timestamp field '{}' has {} value on row {}",
                    view.name,
                    column.name,
                    value.type_name(),
                    row
                )));
            }
            columns.push(column);
            continue;
        }

        let Some(field) = view.field(&column.name) else {
            columns.push(column);
            continue;
        };

        if let Some((row, value)) = column
            .values
            .iter()
            .enumerate()
            .find(|(_, v)| !field.dtype.accepts(v))
        {
            return Err(Error::schema_mismatch(format!(
                "feature view '{}': column '{}' expects {}, got {} value {} on row {}",
                view.name,
                field.name,
                field.dtype,
                value.type_name(),
                value,
                row
            )));
        }

        let dtype = field.dtype;
        let values = column.values.into_iter().map(|v| dtype.coerce(v)).collect();
        columns.push(Column::new(column.name, values));
    }

    RowBatch::try_new(columns)
}

/// Fails with `SchemaMismatch` on the first row whose join key cannot
/// identify an entity
pub fn check_join_key_column(batch: &RowBatch, view: &StreamFeatureView, key: &str) -> Result<()> {
    let column = batch.require_column(key)?;
    match column
        .values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_join_key_value())
    {
        Some((row, value)) => Err(Error::schema_mismatch(format!(
            "feature view '{}': join key '{}' has {} value on row {}",
            view.name,
            key,
            value.type_name(),
            row
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Aggregation, AggregationFunction, BatchSource, Field, MessageFormat, StreamSource,
        ValueType,
    };
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn entity() -> Entity {
        Entity::new("driver_entity", vec!["test_key"])
    }

    fn source() -> StreamSource {
        StreamSource::new(
            "kafka",
            "test_path",
            "event_timestamp",
            MessageFormat::Avro {
                schema_json: String::new(),
            },
        )
    }

    fn view() -> StreamFeatureView {
        StreamFeatureView::new("simple_sfv", source())
            .with_entities(["driver_entity"])
            .with_schema(vec![Field::new("dummy_field", ValueType::Float32)])
            .with_aggregation(Aggregation::new(
                "dummy_field",
                AggregationFunction::Max,
                Duration::from_secs(86_400),
            ))
    }

    fn check(view: &StreamFeatureView) -> Check {
        let e = entity();
        validate_stream_feature_view(view, |name| (name == e.name).then_some(&e))
    }

    #[test]
    fn test_valid_view_passes() {
        assert_eq!(check(&view()), Ok(()));
    }

    #[test]
    fn test_entity_checks() {
        assert!(validate_entity(&entity()).is_ok());
        assert!(validate_entity(&Entity::new("", vec!["k"])).is_err());
        assert!(validate_entity(&Entity::new("e", Vec::<String>::new())).is_err());
        assert!(validate_entity(&Entity::new("e", vec!["k", "k"])).is_err());
    }

    #[test]
    fn test_aggregation_column_must_be_in_schema() {
        let view = view().with_aggregation(Aggregation::new(
            "dummy_field2",
            AggregationFunction::Count,
            Duration::from_secs(86_400),
        ));
        assert_eq!(
            check(&view),
            Err(ValidationError::UnknownAggregationColumn {
                view: "simple_sfv".to_string(),
                column: "dummy_field2".to_string(),
            })
        );
    }

    #[test]
    fn test_unresolved_entity() {
        let view = view().with_entities(["rider"]);
        assert!(matches!(
            check(&view),
            Err(ValidationError::UnresolvedEntity { ref entity, .. }) if entity == "rider"
        ));
    }

    #[test]
    fn test_batch_source_rejected() {
        let mut view = view();
        view.source = BatchSource::new("test_path", "event_timestamp").into();
        assert!(matches!(check(&view), Err(ValidationError::NotAStreamSource { .. })));
    }

    #[test]
    fn test_duplicate_output_names_rejected() {
        let view = view().with_aggregation(Aggregation::new(
            "dummy_field",
            AggregationFunction::Min,
            Duration::from_secs(3600),
        ));
        assert!(matches!(check(&view), Err(ValidationError::InvalidDefinition { .. })));

        let named = self::view().with_aggregation(
            Aggregation::new("dummy_field", AggregationFunction::Min, Duration::from_secs(3600))
                .with_name("dummy_field_min"),
        );
        assert_eq!(check(&named), Ok(()));
    }

    #[test]
    fn test_output_colliding_with_passthrough_rejected() {
        let view = view()
            .with_schema(vec![
                Field::new("dummy_field", ValueType::Float32),
                Field::new("status", ValueType::String),
            ])
            .with_aggregations(vec![Aggregation::new(
                "dummy_field",
                AggregationFunction::Max,
                Duration::from_secs(60),
            )
            .with_name("status")]);
        assert!(matches!(check(&view), Err(ValidationError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_inapplicable_function_rejected() {
        let view = view()
            .with_schema(vec![Field::new("status", ValueType::String)])
            .with_aggregations(vec![Aggregation::new(
                "status",
                AggregationFunction::Sum,
                Duration::from_secs(60),
            )]);
        assert!(matches!(check(&view), Err(ValidationError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_zero_window_rejected() {
        let view = view().with_aggregations(vec![Aggregation::new(
            "dummy_field",
            AggregationFunction::Max,
            Duration::ZERO,
        )]);
        assert!(matches!(check(&view), Err(ValidationError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_duplicate_schema_field_rejected() {
        let view = view().with_schema(vec![
            Field::new("dummy_field", ValueType::Float32),
            Field::new("dummy_field", ValueType::Int64),
        ]);
        assert!(matches!(check(&view), Err(ValidationError::InvalidDefinition { .. })));
    }

    fn ts(secs: i64) -> FeatureValue {
        FeatureValue::Timestamp(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_conform_coerces_ints_into_float_fields() {
        let batch = RowBatch::builder()
            .column("test_key", vec![1001i64.into()])
            .column("dummy_field", vec![3i64.into()])
            .column("event_timestamp", vec![ts(0)])
            .build()
            .unwrap();

        let out = conform_batch(batch, &view(), &["test_key".to_string()]).unwrap();
        assert_eq!(out.value(0, "dummy_field"), Some(&FeatureValue::Float(3.0)));
    }

    #[test]
    fn test_conform_rejects_missing_and_mistyped_columns() {
        let keys = vec!["test_key".to_string()];

        let missing_key = RowBatch::builder()
            .column("dummy_field", vec![1.0.into()])
            .column("event_timestamp", vec![ts(0)])
            .build()
            .unwrap();
        assert!(matches!(
            conform_batch(missing_key, &view(), &keys),
            Err(Error::SchemaMismatch(_))
        ));

        let wrong_type = RowBatch::builder()
            .column("test_key", vec![1i64.into()])
            .column("dummy_field", vec!["high".into()])
            .column("event_timestamp", vec![ts(0)])
            .build()
            .unwrap();
        assert!(matches!(
            conform_batch(wrong_type, &view(), &keys),
            Err(Error::SchemaMismatch(_))
        ));

        let null_ts = RowBatch::builder()
            .column("test_key", vec![1i64.into()])
            .column("dummy_field", vec![1.0.into()])
            .column("event_timestamp", vec![FeatureValue::Null])
            .build()
            .unwrap();
        assert!(matches!(
            conform_batch(null_ts, &view(), &keys),
            Err(Error::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_conform_rejects_unusable_join_keys() {
        let keys = vec!["test_key".to_string()];
        let with_key = |key: FeatureValue| {
            RowBatch::builder()
                .column("test_key", vec![1i64.into(), key])
                .column("dummy_field", vec![1.0.into(), 2.0.into()])
                .column("event_timestamp", vec![ts(0), ts(1)])
                .build()
                .unwrap()
        };

        let err = conform_batch(with_key(FeatureValue::Null), &view(), &keys).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(ref msg) if msg.contains("row 1")));

        let list = FeatureValue::List(vec![1i64.into(), 2i64.into()]);
        assert!(matches!(
            conform_batch(with_key(list), &view(), &keys),
            Err(Error::SchemaMismatch(_))
        ));

        assert!(conform_batch(with_key("null".into()), &view(), &keys).is_ok());
    }
}
