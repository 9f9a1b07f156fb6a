//! Online store trait for low-latency feature serving
//!
//! The aggregation engine materializes one [`FeatureRow`] per entity key and
//! writes it here; the serving facade reads the latest row per key back.
//!
//! ```text
//! ┌──────────────┐  push   ┌──────────────────┐  write  ┌──────────────┐  read  ┌─────────┐
//! │ stream batch │ ──────► │ transform +      │ ──────► │ Online Store │ ─────► │ serving │
//! └──────────────┘         │ aggregation      │         │ (latest row) │        └─────────┘
//!                          └──────────────────┘         └──────────────┘
//! ```
//!
//! ## Semantics
//!
//! - one record per `(feature view, entity key tuple)`, replaced on write
//! - a write of one record is atomic: readers see the old row or the new one
//! - a key that was never written reads back as `None`
//!
//! Expiry by view TTL is decided at read time by the serving layer, because
//! it depends on the definition in force when the request is served.

use crate::{EntityKey, FeatureRow, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Options for a write batch
#[derive(Debug, Clone, Default)]
pub struct OnlineWriteConfig {
    /// Storage-level expiry (None = keep until overwritten or deleted)
    pub ttl: Option<Duration>,
}

impl OnlineWriteConfig {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Keyed storage of the latest feature row per entity key
///
/// Entity key tuples are passed as one `Vec<EntityKey>` per lookup so
/// composite keys (several join keys) are supported.
#[async_trait]
pub trait OnlineStore: Send + Sync {
    /// Latest row for each key tuple, in request order
    ///
    /// The result has exactly one slot per requested key; keys with no record
    /// (or whose storage-level TTL passed) yield `None`.
    async fn get_online_features(
        &self,
        feature_view: &str,
        entity_keys: &[Vec<EntityKey>],
    ) -> Result<Vec<Option<FeatureRow>>>;

    /// Upserts rows, keyed by each row's `entities`
    async fn write_online_features(
        &self,
        feature_view: &str,
        rows: Vec<FeatureRow>,
        config: OnlineWriteConfig,
    ) -> Result<()>;

    /// Removes the records of the given key tuples (missing keys are ignored)
    async fn delete_online_features(
        &self,
        feature_view: &str,
        entity_keys: &[Vec<EntityKey>],
    ) -> Result<()>;

    async fn health_check(&self) -> Result<()>;

    /// Store type name, for logging and metrics
    fn store_type(&self) -> &'static str;
}

/// Builds the storage key of one record
///
/// Format: `{feature_view}:{key1_name}={key1_value}:{key2_name}={key2_value}`.
/// Keys are sorted by name so the tuple order doesn't matter. `%`, `:` and
/// `=` inside names and values are percent-escaped.
pub fn build_online_key(feature_view: &str, entity_keys: &[EntityKey]) -> String {
    let mut sorted: Vec<&EntityKey> = entity_keys.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut key = escape(feature_view);
    for entity in sorted {
        key.push(':');
        key.push_str(&escape(&entity.name));
        key.push('=');
        key.push_str(&escape(&entity.value));
    }
    key
}

/// Reverse of [`build_online_key`]
pub fn parse_online_key(key: &str) -> Option<(String, Vec<EntityKey>)> {
    let mut parts = key.split(':');
    let feature_view = unescape(parts.next()?)?;

    let entity_keys = parts
        .map(|part| {
            let (name, value) = part.split_once('=')?;
            Some(EntityKey::new(unescape(name)?, unescape(value)?))
        })
        .collect::<Option<Vec<_>>>()?;

    Some((feature_view, entity_keys))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '=' => out.push_str("%3D"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        out.push(match code {
            "25" => '%',
            "3A" => ':',
            "3D" => '=',
            _ => return None,
        });
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}
