//! Core data types for featurestream
//!
//! This module defines the value model shared by every crate: typed feature
//! values, the closed set of field dtypes, entity keys and materialized
//! feature rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// A single feature or column value
///
/// Uses `#[serde(untagged)]` for clean JSON:
/// - `Int(42)` → `42`
/// - `String("a")` → `"a"`
/// - `List([1, 2])` → `[1, 2]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Null/missing value
    /// Must be first for untagged deserialization to pick it for `null`
    Null,

    Bool(bool),

    Int(i64),

    Float(f64),

    String(String),

    /// Event or computed timestamp
    Timestamp(DateTime<Utc>),

    /// Homogeneous list of values (elements may be null)
    List(Vec<FeatureValue>),

    /// Raw bytes
    ///
    /// Serializes as an array of numbers, so it deserializes back as `List`.
    /// Only constructed programmatically.
    Bytes(Vec<u8>),
}

impl FeatureValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::List(_) => "list",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Numeric view of the value (ints widen to f64)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Orders two values of comparable types
    ///
    /// Ints and floats compare numerically with each other. Values of
    /// unrelated types (or NaN) are incomparable.
    pub fn compare(&self, other: &FeatureValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(_), Self::Float(_))
            | (Self::Float(_), Self::Int(_))
            | (Self::Float(_), Self::Float(_)) => self.as_f64()?.partial_cmp(&other.as_f64()?),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Whether the value can identify an entity
    ///
    /// Null and list values are rejected as join keys: their canonical forms
    /// would collide with strings such as `"null"` or `"[1,2]"`.
    pub fn is_join_key_value(&self) -> bool {
        !matches!(self, Self::Null | Self::List(_))
    }

    /// Canonical string form used to build online store keys
    ///
    /// Two entity values map to the same key iff their canonical forms match,
    /// so `Int(1001)` and `String("1001")` share a key. Only values passing
    /// [`FeatureValue::is_join_key_value`] are used as keys.
    pub fn canonical_key(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::String(s) => s.clone(),
            Self::Timestamp(ts) => ts.to_rfc3339(),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.canonical_key()).collect();
                format!("[{}]", parts.join(","))
            }
            Self::Bytes(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_key())
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for FeatureValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for FeatureValue {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for FeatureValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<FeatureValue>> From<Option<T>> for FeatureValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Field data types
///
/// A closed set of primitive types and list-of each primitive, named the way
/// they appear in serialized definitions (`"float32"`, `"int64_list"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Bool,
    UnixTimestamp,
    Int32List,
    Int64List,
    Float32List,
    Float64List,
    StringList,
    BytesList,
    BoolList,
    UnixTimestampList,
}

impl ValueType {
    /// Element type of a list dtype, `None` for primitives
    pub fn element_type(&self) -> Option<ValueType> {
        match self {
            Self::Int32List => Some(Self::Int32),
            Self::Int64List => Some(Self::Int64),
            Self::Float32List => Some(Self::Float32),
            Self::Float64List => Some(Self::Float64),
            Self::StringList => Some(Self::String),
            Self::BytesList => Some(Self::Bytes),
            Self::BoolList => Some(Self::Bool),
            Self::UnixTimestampList => Some(Self::UnixTimestamp),
            _ => None,
        }
    }

    /// List dtype with this element type (lists of lists are not supported)
    pub fn list_of(self) -> Option<ValueType> {
        match self {
            Self::Int32 => Some(Self::Int32List),
            Self::Int64 => Some(Self::Int64List),
            Self::Float32 => Some(Self::Float32List),
            Self::Float64 => Some(Self::Float64List),
            Self::String => Some(Self::StringList),
            Self::Bytes => Some(Self::BytesList),
            Self::Bool => Some(Self::BoolList),
            Self::UnixTimestamp => Some(Self::UnixTimestampList),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        self.element_type().is_some()
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Float32 | Self::Float64)
    }

    /// True if `value` can be stored in a field of this dtype
    ///
    /// Coercion rules: null fits every dtype, integers fit float fields,
    /// int32 fields require the value to fit in 32 bits.
    pub fn accepts(&self, value: &FeatureValue) -> bool {
        if value.is_null() {
            return true;
        }

        if let Some(element) = self.element_type() {
            return match value {
                FeatureValue::List(items) => items.iter().all(|v| element.accepts(v)),
                _ => false,
            };
        }

        match (self, value) {
            (Self::Int32, FeatureValue::Int(v)) => i32::try_from(*v).is_ok(),
            (Self::Int64, FeatureValue::Int(_)) => true,
            (Self::Float32 | Self::Float64, FeatureValue::Int(_) | FeatureValue::Float(_)) => true,
            (Self::String, FeatureValue::String(_)) => true,
            (Self::Bytes, FeatureValue::Bytes(_)) => true,
            (Self::Bool, FeatureValue::Bool(_)) => true,
            (Self::UnixTimestamp, FeatureValue::Timestamp(_)) => true,
            _ => false,
        }
    }

    /// Converts an accepted value into this dtype's canonical representation
    ///
    /// Integers stored in float fields become floats; everything else is
    /// returned unchanged.
    pub fn coerce(&self, value: FeatureValue) -> FeatureValue {
        match (self, value) {
            (Self::Float32 | Self::Float64, FeatureValue::Int(v)) => FeatureValue::Float(v as f64),
            (dtype, FeatureValue::List(items)) => match dtype.element_type() {
                Some(element) => {
                    FeatureValue::List(items.into_iter().map(|v| element.coerce(v)).collect())
                }
                None => FeatureValue::List(items),
            },
            (_, value) => value,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Bool => "bool",
            Self::UnixTimestamp => "unix_timestamp",
            Self::Int32List => "int32_list",
            Self::Int64List => "int64_list",
            Self::Float32List => "float32_list",
            Self::Float64List => "float64_list",
            Self::StringList => "string_list",
            Self::BytesList => "bytes_list",
            Self::BoolList => "bool_list",
            Self::UnixTimestampList => "unix_timestamp_list",
        };
        f.write_str(name)
    }
}

/// Represents a single entity identifier (e.g., driver_id = 1001)
///
/// The value is kept in its canonical string form so composite keys can be
/// encoded and compared without caring about the original value type.
///
/// # Examples
///
/// ```
/// use featurestream_core::{EntityKey, FeatureValue};
///
/// let key = EntityKey::from_value("driver_id", &FeatureValue::Int(1001));
/// assert_eq!(key.value, "1001");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    /// The join key column name (e.g., "driver_id")
    pub name: String,

    /// Canonical string form of the value
    pub value: String,
}

impl EntityKey {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Builds a key from a typed value using its canonical form
    pub fn from_value(name: impl Into<String>, value: &FeatureValue) -> Self {
        Self {
            name: name.into(),
            value: value.canonical_key(),
        }
    }
}

/// Materialized features for a single entity key
///
/// This is what the aggregation engine writes to the online store and what
/// the online store hands back to the serving layer.
///
/// # Examples
///
/// ```
/// use featurestream_core::{EntityKey, FeatureRow, FeatureValue};
/// use chrono::Utc;
///
/// let row = FeatureRow::new(vec![EntityKey::new("driver_id", "1001")], Utc::now())
///     .with_feature("trips_max_1d", FeatureValue::Int(12));
/// assert_eq!(row.get_feature("trips_max_1d"), Some(&FeatureValue::Int(12)));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureRow {
    /// Entity identifiers for this row
    pub entities: Vec<EntityKey>,

    /// Feature name -> value mapping
    pub features: HashMap<String, FeatureValue>,

    /// Event timestamp of the row that produced these values
    pub timestamp: DateTime<Utc>,
}

impl FeatureRow {
    pub fn new(entities: Vec<EntityKey>, timestamp: DateTime<Utc>) -> Self {
        Self {
            entities,
            features: HashMap::new(),
            timestamp,
        }
    }

    /// Adds a feature to this row (builder pattern)
    pub fn with_feature(mut self, name: impl Into<String>, value: FeatureValue) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    pub fn add_feature(&mut self, name: String, value: FeatureValue) {
        self.features.insert(name, value);
    }

    pub fn get_feature(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }
}
