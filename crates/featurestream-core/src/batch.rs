//! Column-oriented row batches
//!
//! Stream connectors hand the core typed batches; transforms map one batch to
//! another and the aggregation engine consumes them row by row.

use crate::{Error, FeatureValue, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named column of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<FeatureValue>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<FeatureValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// A batch of rows stored column by column
///
/// Invariant: every column has the same length and column names are unique.
///
/// # Example
///
/// ```
/// use featurestream_core::{RowBatch, FeatureValue};
///
/// let batch = RowBatch::builder()
///     .column("a", vec![FeatureValue::Int(1), FeatureValue::Int(2)])
///     .column("b", vec![FeatureValue::Int(10), FeatureValue::Int(20)])
///     .build()
///     .unwrap();
///
/// assert_eq!(batch.num_rows(), 2);
/// assert_eq!(batch.value(1, "b"), Some(&FeatureValue::Int(20)));
/// ```
///
/// Deserialized batches go through [`RowBatch::try_new`], so a decoded batch
/// upholds the same invariant as a built one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RowBatchRepr", into = "RowBatchRepr")]
pub struct RowBatch {
    columns: Vec<Column>,
    num_rows: usize,
}

/// Wire form of a [`RowBatch`]: the columns only
#[derive(Serialize, Deserialize)]
struct RowBatchRepr {
    columns: Vec<Column>,
}

impl TryFrom<RowBatchRepr> for RowBatch {
    type Error = Error;

    fn try_from(repr: RowBatchRepr) -> Result<Self> {
        Self::try_new(repr.columns)
    }
}

impl From<RowBatch> for RowBatchRepr {
    fn from(batch: RowBatch) -> Self {
        Self {
            columns: batch.columns,
        }
    }
}

impl RowBatch {
    /// Creates a batch, checking column lengths and name uniqueness
    pub fn try_new(columns: Vec<Column>) -> Result<Self> {
        let num_rows = columns.first().map(|c| c.values.len()).unwrap_or(0);

        let mut seen = std::collections::HashSet::with_capacity(columns.len());
        for column in &columns {
            if column.values.len() != num_rows {
                return Err(Error::schema_mismatch(format!(
                    "column '{}' has {} rows, expected {}",
                    column.name,
                    column.values.len(),
                    num_rows
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(Error::schema_mismatch(format!(
                    "column '{}' appears more than once",
                    column.name
                )));
            }
        }

        Ok(Self { columns, num_rows })
    }

    pub fn builder() -> RowBatchBuilder {
        RowBatchBuilder::default()
    }

    /// Builds a batch from row-wise maps, using `columns` as the column order
    ///
    /// Missing entries become null.
    pub fn from_rows(columns: &[&str], rows: &[HashMap<String, FeatureValue>]) -> Result<Self> {
        let cols = columns
            .iter()
            .map(|name| {
                let values = rows
                    .iter()
                    .map(|row| row.get(*name).cloned().unwrap_or(FeatureValue::Null))
                    .collect();
                Column::new(*name, values)
            })
            .collect();
        Self::try_new(cols)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Looks up a column, failing with `SchemaMismatch` if it is absent
    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| {
            Error::schema_mismatch(format!(
                "column '{}' is not present in batch (columns: {:?})",
                name,
                self.column_names()
            ))
        })
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&FeatureValue> {
        self.column(column).and_then(|c| c.values.get(row))
    }

    /// Name → position index, for repeated per-row lookups
    pub fn column_index(&self) -> HashMap<&str, usize> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), i))
            .collect()
    }

    /// Value at (row, column position)
    pub fn value_at(&self, row: usize, column: usize) -> &FeatureValue {
        &self.columns[column].values[row]
    }

    /// Materializes one row as a name → value map
    pub fn row(&self, row: usize) -> HashMap<String, FeatureValue> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.values[row].clone()))
            .collect()
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }
}

/// Builder for [`RowBatch`]
#[derive(Debug, Default)]
pub struct RowBatchBuilder {
    columns: Vec<Column>,
}

impl RowBatchBuilder {
    pub fn column(mut self, name: impl Into<String>, values: Vec<FeatureValue>) -> Self {
        self.columns.push(Column::new(name, values));
        self
    }

    pub fn build(self) -> Result<RowBatch> {
        RowBatch::try_new(self.columns)
    }
}
