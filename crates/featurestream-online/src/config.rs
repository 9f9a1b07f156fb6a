//! Configuration management
//!
//! A feature store is configured from a YAML file (`featurestream.yaml`).
//! Every section is optional; missing keys fall back to their defaults.
//!
//! ```yaml
//! project: driver_ranking
//!
//! registry:
//!   path: ".featurestream/registry.db"   # or ":memory:"
//!
//! online_store:
//!   type: memory
//!   write_ttl_seconds: 86400
//!
//! ingestion:
//!   parallel: true
//! ```

use featurestream_registry::RegistryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete configuration of a [`FeatureStore`](crate::FeatureStore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStoreConfig {
    /// Project name, used in logs
    #[serde(default = "default_project")]
    pub project: String,

    #[serde(default)]
    pub registry: RegistrySection,

    #[serde(default)]
    pub online_store: OnlineStoreSection,

    #[serde(default)]
    pub ingestion: IngestionSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySection {
    /// SQLite database file, or `:memory:`
    #[serde(default = "default_registry_path")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineStoreSection {
    /// Store type; only "memory" is built in
    #[serde(rename = "type", default = "default_store_type")]
    pub store_type: String,

    /// Storage-level expiry applied to every write (null = none)
    #[serde(default)]
    pub write_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSection {
    /// Update entity keys of one batch in parallel
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

// Default value functions (used by serde)

fn default_project() -> String {
    "default".to_string()
}

fn default_registry_path() -> String {
    ":memory:".to_string()
}

fn default_store_type() -> String {
    "memory".to_string()
}

fn default_parallel() -> bool {
    true
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            registry: RegistrySection::default(),
            online_store: OnlineStoreSection::default(),
            ingestion: IngestionSection::default(),
        }
    }
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

impl Default for OnlineStoreSection {
    fn default() -> Self {
        Self {
            store_type: default_store_type(),
            write_ttl_seconds: None,
        }
    }
}

impl Default for IngestionSection {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
        }
    }
}

impl FeatureStoreConfig {
    /// Parses a YAML document
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Uses the given SQLite file for the registry
    pub fn with_registry_path(mut self, path: impl Into<String>) -> Self {
        self.registry.path = path.into();
        self
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::sqlite(self.registry.path.clone())
    }

    pub fn write_ttl(&self) -> Option<Duration> {
        self.online_store.write_ttl_seconds.map(Duration::from_secs)
    }
}

/// Load configuration from a file
///
/// A missing file is not an error: the defaults are returned and a warning
/// is logged. An unreadable or malformed file is.
///
/// ```rust,ignore
/// let config = load("featurestream.yaml")?;
/// println!("Registry at {}", config.registry.path);
/// ```
pub fn load(path: impl AsRef<Path>) -> anyhow::Result<FeatureStoreConfig> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::warn!("Configuration file {:?} not found, using defaults", path);
        return Ok(FeatureStoreConfig::default());
    }

    let contents = std::fs::read_to_string(path)?;
    let config = FeatureStoreConfig::from_yaml(&contents)?;

    tracing::info!(project = %config.project, "Loaded configuration from {:?}", path);

    Ok(config)
}
