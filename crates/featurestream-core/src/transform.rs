//! Row transformations attached to stream feature views
//!
//! A [`Transformation`] is the stored form of a user's per-row function: a
//! named list of output columns, each defined by an [`Expr`]. Because it is
//! plain data it can be persisted in the registry, loaded in another process
//! and re-applied with identical results.
//!
//! ## Column contract
//!
//! - `inputs` are the columns the transform declares it reads; every one must
//!   be present in the incoming batch
//! - the output batch must contain the owning view's schema columns with
//!   compatible dtypes (checked by [`crate::validation::conform_batch`])
//!
//! Both checks happen at invocation time and fail with `SchemaMismatch`.
//!
//! ## Example
//!
//! ```
//! use featurestream_core::{Expr, FeatureValue, RowBatch, Transformation};
//!
//! let add_ten = Transformation::new("add_ten")
//!     .with_inputs(["a"])
//!     .with_output("a", Expr::add(Expr::column("a"), Expr::literal(10i64)))
//!     .keep_inputs(true);
//!
//! let batch = RowBatch::builder()
//!     .column("a", vec![FeatureValue::Int(1)])
//!     .build()
//!     .unwrap();
//!
//! let out = add_ten.apply(&batch).unwrap();
//! assert_eq!(out.value(0, "a"), Some(&FeatureValue::Int(11)));
//! ```

use crate::batch::{Column, RowBatch};
use crate::{Error, Expr, FeatureValue, Result};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// One output column of a transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub name: String,
    pub expr: Expr,
}

/// A named, serializable row-to-row mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    /// Identity of the transform; feature views default their name to this
    pub name: String,

    /// Declared input columns
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Computed columns in declaration order
    #[serde(default)]
    pub outputs: Vec<OutputColumn>,

    /// Pass input columns that are not overwritten through to the output
    #[serde(default)]
    pub keep_inputs: bool,
}

impl Transformation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            keep_inputs: false,
        }
    }

    /// The identity transform: every input column passes through unchanged
    pub fn identity(name: impl Into<String>) -> Self {
        Self::new(name).keep_inputs(true)
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.outputs.push(OutputColumn {
            name: name.into(),
            expr,
        });
        self
    }

    pub fn keep_inputs(mut self, keep: bool) -> Self {
        self.keep_inputs = keep;
        self
    }

    /// Names of the columns this transform produces when given `input_columns`
    pub fn output_columns<'a>(&'a self, input_columns: &[&'a str]) -> Vec<&'a str> {
        let mut names: Vec<&str> = Vec::new();
        if self.keep_inputs {
            names.extend(input_columns.iter().copied());
        }
        for output in &self.outputs {
            if !names.contains(&output.name.as_str()) {
                names.push(&output.name);
            }
        }
        names
    }

    /// Stable content hash of the definition
    ///
    /// SipHash-1-3 over the JSON serialization, rendered as 16 hex digits.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = SipHasher13::new();
        hasher.write(&canonical);
        Ok(format!("{:016x}", hasher.finish()))
    }

    /// Applies the transformation to a batch
    ///
    /// Output column order: kept input columns in input order (an output with
    /// the same name replaces the input in place), then new outputs in
    /// declaration order.
    pub fn apply(&self, batch: &RowBatch) -> Result<RowBatch> {
        for input in &self.inputs {
            if !batch.has_column(input) {
                return Err(Error::schema_mismatch(format!(
                    "transform '{}' declares input column '{}' which is not in the batch (columns: {:?})",
                    self.name,
                    input,
                    batch.column_names()
                )));
            }
        }

        for output in &self.outputs {
            for column in output.expr.referenced_columns() {
                if !batch.has_column(column) {
                    return Err(Error::schema_mismatch(format!(
                        "transform '{}' output '{}' reads column '{}' which is not in the batch",
                        self.name, output.name, column
                    )));
                }
            }
        }

        let index = batch.column_index();
        let mut computed: Vec<Column> = self
            .outputs
            .iter()
            .map(|o| Column::new(o.name.clone(), Vec::with_capacity(batch.num_rows())))
            .collect();

        for row in 0..batch.num_rows() {
            let lookup = |name: &str| -> Option<&FeatureValue> {
                index.get(name).map(|&col| batch.value_at(row, col))
            };
            for (output, column) in self.outputs.iter().zip(computed.iter_mut()) {
                let value = output.expr.evaluate(&lookup).map_err(|e| match e {
                    Error::SchemaMismatch(msg) => Error::schema_mismatch(format!(
                        "transform '{}' failed on row {} computing '{}': {}",
                        self.name, row, output.name, msg
                    )),
                    other => other,
                })?;
                column.values.push(value);
            }
        }

        let mut columns: Vec<Column> = Vec::new();
        if self.keep_inputs {
            for input in batch.columns() {
                match computed.iter().position(|c| c.name == input.name) {
                    Some(pos) => columns.push(computed.remove(pos)),
                    None => columns.push(input.clone()),
                }
            }
        }
        columns.extend(computed);

        RowBatch::try_new(columns)
    }
}
