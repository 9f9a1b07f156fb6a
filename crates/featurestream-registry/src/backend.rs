//! Registry backend trait and configuration
//!
//! The registry keeps its snapshot in memory and persists definitions through
//! a [`RegistryBackend`]: a durable map from `(kind, name)` to a JSON
//! definition. The embedded SQLite backend is the only implementation shipped
//! here.

use crate::schema::ObjectKind;
use anyhow::Result;
use async_trait::async_trait;

/// One persisted object definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub name: String,
    /// Insertion order within the kind
    pub position: i64,
    /// JSON definition
    pub definition: String,
}

/// Registry backend trait for storage operations
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Initialize schema (create tables, indexes)
    async fn init_schema(&self) -> Result<()>;

    /// Insert or replace objects by `(kind, name)` in a single transaction
    ///
    /// Either every object is written or none is. An existing object keeps
    /// its original `position`.
    async fn upsert_objects(&self, objects: &[StoredObject]) -> Result<()>;

    /// Every stored object, ordered by kind then position
    async fn load_objects(&self) -> Result<Vec<StoredObject>>;
}

/// Configuration for registry backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryConfig {
    /// SQLite with WAL mode (embedded, multi-process safe)
    SQLite {
        /// Path to SQLite database file, or `:memory:`
        path: String,
    },
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::SQLite {
            path: ".featurestream/registry.db".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Create SQLite configuration
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::SQLite { path: path.into() }
    }

    /// Non-persistent SQLite registry
    pub fn in_memory() -> Self {
        Self::sqlite(":memory:")
    }
}
