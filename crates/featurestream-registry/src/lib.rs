//! Feature registry and apply engine for featurestream
//!
//! The registry holds the committed definitions of entities and stream
//! feature views. Definitions enter only through [`FeatureRegistry::apply`],
//! which validates a whole set of objects against the state they would
//! produce and then commits all of them or none.
//!
//! ## Apply semantics
//!
//! - new name: created (appended to the listing order)
//! - existing name, different definition: updated in place
//! - existing name, equal definition: unchanged (no write)
//! - objects not mentioned: left alone (apply never deletes)
//!
//! Persistence goes through a [`RegistryBackend`]; the in-memory snapshot is
//! only swapped once the backend transaction has committed, so a failed apply
//! leaves both untouched.
//!
//! # Examples
//!
//! ```rust,ignore
//! use featurestream_registry::{FeatureRegistry, RegistryConfig};
//!
//! let registry = FeatureRegistry::new(RegistryConfig::sqlite("./registry.db")).await?;
//! let report = registry.apply(vec![driver.into(), driver_stats.into()]).await?;
//! println!("{} created, {} updated", report.created(), report.updated());
//! ```

use featurestream_core::validation::{validate_entity, validate_stream_feature_view};
use featurestream_core::{
    recover_read, recover_write, Entity, Error, Result, StreamFeatureView, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

pub mod backend;
pub use backend::{RegistryBackend, RegistryConfig, StoredObject};

mod schema;
mod sqlite_backend;

pub use schema::ObjectKind;
pub use sqlite_backend::SqliteBackend;

/// Any object that can be applied to the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryObject {
    Entity(Entity),
    StreamFeatureView(StreamFeatureView),
}

impl RegistryObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Entity(_) => ObjectKind::Entity,
            Self::StreamFeatureView(_) => ObjectKind::StreamFeatureView,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Entity(entity) => &entity.name,
            Self::StreamFeatureView(view) => &view.name,
        }
    }

    fn to_json(&self) -> Result<String> {
        Ok(match self {
            Self::Entity(entity) => serde_json::to_string(entity)?,
            Self::StreamFeatureView(view) => serde_json::to_string(view)?,
        })
    }

    fn from_stored(stored: &StoredObject) -> Result<Self> {
        Ok(match stored.kind {
            ObjectKind::Entity => Self::Entity(serde_json::from_str(&stored.definition)?),
            ObjectKind::StreamFeatureView => {
                Self::StreamFeatureView(serde_json::from_str(&stored.definition)?)
            }
        })
    }
}

impl From<Entity> for RegistryObject {
    fn from(entity: Entity) -> Self {
        Self::Entity(entity)
    }
}

impl From<StreamFeatureView> for RegistryObject {
    fn from(view: StreamFeatureView) -> Self {
        Self::StreamFeatureView(view)
    }
}

/// What `apply` did (or would do) with one object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub kind: ObjectKind,
    pub name: String,
    pub action: ChangeAction,
    /// Transform fingerprint of a stream feature view, if it has one
    pub transform_fingerprint: Option<String>,
}

/// One entry per distinct object passed to `apply`, in call order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub changes: Vec<PlannedChange>,
}

impl ApplyReport {
    fn count(&self, action: ChangeAction) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    pub fn created(&self) -> usize {
        self.count(ChangeAction::Create)
    }

    pub fn updated(&self) -> usize {
        self.count(ChangeAction::Update)
    }

    pub fn unchanged(&self) -> usize {
        self.count(ChangeAction::Unchanged)
    }

    /// True if nothing was written
    pub fn is_noop(&self) -> bool {
        self.changes.iter().all(|c| c.action == ChangeAction::Unchanged)
    }
}

/// Committed registry state, in insertion order per kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    entities: Vec<Entity>,
    views: Vec<StreamFeatureView>,
}

impl RegistrySnapshot {
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn stream_feature_views(&self) -> &[StreamFeatureView] {
        &self.views
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn stream_feature_view(&self, name: &str) -> Option<&StreamFeatureView> {
        self.views.iter().find(|v| v.name == name)
    }

    /// Resolved join keys of a view's entities
    pub fn join_keys(&self, view: &StreamFeatureView) -> Result<Vec<String>> {
        view.join_keys(|name| self.entity(name))
    }

    /// Replaces an object with the same name or appends it
    ///
    /// Returns the object's position within its kind.
    fn upsert(&mut self, object: RegistryObject) -> usize {
        fn put<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T) -> bool) -> usize {
            match items.iter().position(same) {
                Some(pos) => {
                    items[pos] = item;
                    pos
                }
                None => {
                    items.push(item);
                    items.len() - 1
                }
            }
        }

        match object {
            RegistryObject::Entity(entity) => {
                let name = entity.name.clone();
                put(&mut self.entities, entity, |e| e.name == name)
            }
            RegistryObject::StreamFeatureView(view) => {
                let name = view.name.clone();
                put(&mut self.views, view, |v| v.name == name)
            }
        }
    }

    fn contains_equal(&self, object: &RegistryObject) -> Option<bool> {
        match object {
            RegistryObject::Entity(entity) => self.entity(&entity.name).map(|e| e == entity),
            RegistryObject::StreamFeatureView(view) => {
                self.stream_feature_view(&view.name).map(|v| v == view)
            }
        }
    }
}

/// Feature registry with a pluggable durable backend
pub struct FeatureRegistry {
    backend: Arc<dyn RegistryBackend>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    /// Serializes `apply` calls
    apply_lock: tokio::sync::Mutex<()>,
}

impl FeatureRegistry {
    /// Opens the registry described by `config` and loads its committed state
    pub async fn new(config: RegistryConfig) -> Result<Self> {
        let backend: Arc<dyn RegistryBackend> = match config {
            RegistryConfig::SQLite { path } => Arc::new(SqliteBackend::new(&path)?),
        };
        Self::with_backend(backend).await
    }

    /// Create in-memory registry (for testing)
    pub async fn in_memory() -> Result<Self> {
        Self::with_backend(Arc::new(SqliteBackend::in_memory()?)).await
    }

    /// Uses an already constructed backend
    pub async fn with_backend(backend: Arc<dyn RegistryBackend>) -> Result<Self> {
        backend.init_schema().await?;

        let mut snapshot = RegistrySnapshot::default();
        for stored in backend.load_objects().await? {
            snapshot.upsert(RegistryObject::from_stored(&stored)?);
        }

        info!(
            entities = snapshot.entities.len(),
            stream_feature_views = snapshot.views.len(),
            "Loaded feature registry"
        );

        Ok(Self {
            backend,
            snapshot: RwLock::new(Arc::new(snapshot)),
            apply_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Current committed state
    pub fn snapshot(&self) -> Result<Arc<RegistrySnapshot>> {
        Ok(Arc::clone(&*recover_read(&self.snapshot, "FeatureRegistry")?))
    }

    /// Validates and commits `objects` atomically
    ///
    /// Fails with `Error::Validation` (nothing committed) if any object is
    /// invalid against the proposed state, or with `Error::StorageError` if
    /// the backend transaction fails.
    pub async fn apply(&self, objects: Vec<RegistryObject>) -> Result<ApplyReport> {
        let _guard = self.apply_lock.lock().await;
        let current = self.snapshot()?;

        let objects = dedupe(objects)?;

        for object in &objects {
            if let RegistryObject::Entity(entity) = object {
                validate_entity(entity)?;
            }
        }

        let mut proposed = (*current).clone();
        let mut report = ApplyReport::default();
        let mut pending = Vec::new();

        for object in objects {
            let action = match current.contains_equal(&object) {
                None => ChangeAction::Create,
                Some(false) => ChangeAction::Update,
                Some(true) => ChangeAction::Unchanged,
            };
            let transform_fingerprint = match &object {
                RegistryObject::StreamFeatureView(view) => {
                    view.transform.as_ref().map(|t| t.fingerprint()).transpose()?
                }
                RegistryObject::Entity(_) => None,
            };
            report.changes.push(PlannedChange {
                kind: object.kind(),
                name: object.name().to_string(),
                action,
                transform_fingerprint,
            });

            if action != ChangeAction::Unchanged {
                let definition = object.to_json()?;
                let kind = object.kind();
                let name = object.name().to_string();
                let position = proposed.upsert(object);
                pending.push(StoredObject {
                    kind,
                    name,
                    position: position as i64,
                    definition,
                });
            }
        }

        // Every view must hold against the proposed entities, including
        // committed views whose entities are being replaced.
        for view in &proposed.views {
            validate_stream_feature_view(view, |name| proposed.entity(name))?;
        }

        if pending.is_empty() {
            debug!(objects = report.changes.len(), "Apply was a no-op");
            return Ok(report);
        }

        self.backend
            .upsert_objects(&pending)
            .await
            .map_err(Error::StorageError)?;

        *recover_write(&self.snapshot, "FeatureRegistry")? = Arc::new(proposed);

        info!(
            created = report.created(),
            updated = report.updated(),
            unchanged = report.unchanged(),
            "Applied registry changes"
        );

        Ok(report)
    }

    /// All committed entities, in the order they were first applied
    pub fn list_entities(&self) -> Result<Vec<Entity>> {
        Ok(self.snapshot()?.entities.clone())
    }

    /// All committed stream feature views, in the order they were first applied
    pub fn list_stream_feature_views(&self) -> Result<Vec<StreamFeatureView>> {
        Ok(self.snapshot()?.views.clone())
    }

    pub fn get_entity(&self, name: &str) -> Result<Entity> {
        self.snapshot()?
            .entity(name)
            .cloned()
            .ok_or_else(|| Error::EntityNotFound(name.to_string()))
    }

    pub fn get_stream_feature_view(&self, name: &str) -> Result<StreamFeatureView> {
        self.snapshot()?
            .stream_feature_view(name)
            .cloned()
            .ok_or_else(|| Error::FeatureViewNotFound(name.to_string()))
    }
}

/// Collapses identical duplicates; differing duplicates are rejected
fn dedupe(objects: Vec<RegistryObject>) -> Result<Vec<RegistryObject>> {
    let mut seen: HashMap<(ObjectKind, String), usize> = HashMap::new();
    let mut unique: Vec<RegistryObject> = Vec::with_capacity(objects.len());

    for object in objects {
        let key = (object.kind(), object.name().to_string());
        match seen.get(&key) {
            Some(&i) if unique[i] == object => continue,
            Some(_) => {
                return Err(ValidationError::DuplicateName {
                    kind: key.0.to_string(),
                    name: key.1,
                }
                .into())
            }
            None => {
                seen.insert(key, unique.len());
                unique.push(object);
            }
        }
    }

    Ok(unique)
}
