//! Entity declarations
//!
//! An entity names the subject of a feature (a driver, a customer) and the
//! ordered join-key columns that identify one instance of it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named key identifying the subject of features
///
/// # Example
///
/// ```
/// use featurestream_core::Entity;
///
/// let driver = Entity::new("driver", vec!["driver_id"]).with_owner("ml@example.com");
/// assert_eq!(driver.join_keys, vec!["driver_id".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity name
    pub name: String,

    /// Ordered join-key columns used to key lookups
    pub join_keys: Vec<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Entity {
    pub fn new<S: Into<String>>(name: impl Into<String>, join_keys: Vec<S>) -> Self {
        Self {
            name: name.into(),
            join_keys: join_keys.into_iter().map(Into::into).collect(),
            description: String::new(),
            owner: String::new(),
            tags: BTreeMap::new(),
        }
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
}
