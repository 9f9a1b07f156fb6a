//! SQLite backend implementation with WAL mode
//!
//! Object definitions are stored as JSON text keyed by `(kind, name)`.
//! Suitable for:
//! - Embedded deployments (no external dependencies)
//! - Development and testing (`:memory:`)

use crate::backend::{RegistryBackend, StoredObject};
use crate::schema::{self, ObjectKind};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use featurestream_core::recover_mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// SQLite backend with WAL mode for multi-process safety
pub struct SqliteBackend {
    db: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Create new SQLite backend from file path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy();
        let is_memory = path_str == ":memory:" || path_str.starts_with("file::memory:");

        if !is_memory {
            if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create registry directory {:?}", parent)
                })?;
            }
        }

        let db = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .context("Failed to open SQLite connection for registry")?;

        if !is_memory {
            db.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to enable WAL mode")?;

            // Wait for locks held by other processes instead of failing
            db.pragma_update(None, "busy_timeout", 5000)
                .context("Failed to set busy timeout")?;

            db.pragma_update(None, "synchronous", "NORMAL")
                .context("Failed to set synchronous mode")?;

            info!("Initialized SQLite registry at {:?} with WAL mode", path.as_ref());
        } else {
            info!("Initialized in-memory SQLite registry");
        }

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Create in-memory SQLite backend (for testing)
    pub fn in_memory() -> Result<Self> {
        let db =
            Connection::open_in_memory().context("Failed to create in-memory SQLite connection")?;

        info!("Initialized in-memory SQLite registry");

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

#[async_trait]
impl RegistryBackend for SqliteBackend {
    async fn init_schema(&self) -> Result<()> {
        let db = recover_mutex(&self.db, "FeatureRegistry")?;
        schema::create_tables(&db)?;
        Ok(())
    }

    async fn upsert_objects(&self, objects: &[StoredObject]) -> Result<()> {
        let mut db = recover_mutex(&self.db, "FeatureRegistry")?;
        let now = Utc::now().timestamp();

        let tx = db
            .transaction()
            .context("Failed to begin registry transaction")?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO registry_objects (kind, name, position, definition, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (kind, name) DO UPDATE SET
                    definition = excluded.definition,
                    updated_at = excluded.updated_at
                "#,
            )?;

            for object in objects {
                stmt.execute(params![
                    object.kind.as_str(),
                    &object.name,
                    object.position,
                    &object.definition,
                    now,
                    now,
                ])
                .with_context(|| format!("Failed to upsert {} '{}'", object.kind, object.name))?;
            }
        }
        tx.commit().context("Failed to commit registry transaction")?;

        debug!(objects = objects.len(), "Committed registry objects");
        Ok(())
    }

    async fn load_objects(&self) -> Result<Vec<StoredObject>> {
        let db = recover_mutex(&self.db, "FeatureRegistry")?;

        let mut stmt = db.prepare(
            "SELECT kind, name, position, definition FROM registry_objects ORDER BY kind, position",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut objects = Vec::new();
        for row in rows {
            let (kind, name, position, definition) = row.context("Failed to read registry row")?;
            let kind = ObjectKind::from_string(&kind)
                .ok_or_else(|| anyhow!("Unknown object kind '{}' for '{}'", kind, name))?;
            objects.push(StoredObject {
                kind,
                name,
                position,
                definition,
            });
        }

        Ok(objects)
    }
}
