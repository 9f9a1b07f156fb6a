//! Database schema for the registry
//!
//! Every registered object is one row keyed by `(kind, name)` holding its JSON
//! definition. `position` records insertion order within a kind and is kept
//! when an object is updated, so listings come back in the order objects were
//! first applied.
//!
//! # Tables
//!
//! - **registry_objects**: committed entities and stream feature views

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a registry object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Entity,
    StreamFeatureView,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::StreamFeatureView => "stream_feature_view",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "entity" => Some(Self::Entity),
            "stream_feature_view" => Some(Self::StreamFeatureView),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn create_tables(db: &Connection) -> Result<()> {
    db.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS registry_objects (
            kind TEXT NOT NULL CHECK (kind IN ('entity', 'stream_feature_view')),
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            definition TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            PRIMARY KEY (kind, name)
        );

        CREATE INDEX IF NOT EXISTS idx_objects_kind_position ON registry_objects(kind, position);
        "#,
    )
    .context("Failed to create registry schema")?;

    Ok(())
}
