//! Schema fields

use crate::ValueType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named, typed column of a feature view schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub dtype: ValueType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: ValueType) -> Self {
        Self {
            name: name.into(),
            dtype,
            description: String::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
