//! Time-windowed aggregation declarations
//!
//! An [`Aggregation`] reads one schema column and produces one feature over a
//! trailing window ending at each event's timestamp.
//!
//! ## Output types
//!
//! | function | input            | output                     |
//! |----------|------------------|----------------------------|
//! | count    | any              | int64                      |
//! | sum      | numeric          | int64 (int) / float64      |
//! | average  | numeric          | float64                    |
//! | max/min  | numeric, time    | same as input              |
//!
//! Integer sums saturate at the `i64` bounds.

use crate::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Aggregation functions for windowed features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFunction {
    Sum,
    Count,
    Max,
    Min,
    #[serde(alias = "avg", alias = "mean")]
    Average,
}

impl AggregationFunction {
    /// Dtype of the aggregated feature, or `None` if the function can't be
    /// applied to a column of `input` type
    pub fn output_type(&self, input: ValueType) -> Option<ValueType> {
        match self {
            Self::Count => Some(ValueType::Int64),
            Self::Sum if input.is_integer() => Some(ValueType::Int64),
            Self::Sum if input.is_numeric() => Some(ValueType::Float64),
            Self::Average if input.is_numeric() => Some(ValueType::Float64),
            Self::Max | Self::Min if input.is_numeric() || input == ValueType::UnixTimestamp => {
                Some(input)
            }
            _ => None,
        }
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Max => "max",
            Self::Min => "min",
            Self::Average => "average",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for AggregationFunction {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "average" | "avg" | "mean" => Ok(Self::Average),
            other => Err(crate::Error::invalid_input(format!(
                "unknown aggregation function '{}'",
                other
            ))),
        }
    }
}

/// A windowed aggregation over one schema column
///
/// # Example
///
/// ```
/// use featurestream_core::{Aggregation, AggregationFunction};
/// use std::time::Duration;
///
/// let agg = Aggregation::new("trips", AggregationFunction::Max, Duration::from_secs(86_400))
///     .with_name("trips_max_1d");
/// assert_eq!(agg.output_name(), "trips_max_1d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Schema column to aggregate
    pub column: String,

    pub function: AggregationFunction,

    /// Trailing window length
    pub time_window: Duration,

    /// Output feature name; defaults to `column`
    #[serde(default)]
    pub name: Option<String>,
}

impl Aggregation {
    pub fn new(column: impl Into<String>, function: AggregationFunction, time_window: Duration) -> Self {
        Self {
            column: column.into(),
            function,
            time_window,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name of the feature this aggregation materializes
    pub fn output_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.column)
    }
}
