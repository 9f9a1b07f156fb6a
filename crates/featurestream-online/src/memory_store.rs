//! In-process online store
//!
//! One record per `(feature view, entity key tuple)`, held in a map keyed by
//! [`build_online_key`]. A write batch is applied under a single write lock,
//! so readers observe either the state before the batch or after it.

use async_trait::async_trait;
use featurestream_core::{
    build_online_key, parse_online_key, recover_read, recover_write, EntityKey, FeatureRow,
    OnlineStore, OnlineWriteConfig, Result,
};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

#[derive(Debug, Clone)]
struct StoredRecord {
    row: FeatureRow,
    /// Storage-level expiry from the write config
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// Online store backed by a `HashMap` behind an `RwLock`
#[derive(Debug, Default)]
pub struct InMemoryOnlineStore {
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl InMemoryOnlineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included until overwritten
    pub fn len(&self) -> usize {
        recover_read(&self.records, "InMemoryOnlineStore")
            .map(|records| records.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key tuples with a live record for `feature_view`, sorted
    pub fn entity_keys(&self, feature_view: &str) -> Result<Vec<Vec<EntityKey>>> {
        let now = Instant::now();
        let records = recover_read(&self.records, "InMemoryOnlineStore")?;

        let mut keys: Vec<Vec<EntityKey>> = records
            .iter()
            .filter(|(_, record)| !record.is_expired(now))
            .filter_map(|(key, _)| parse_online_key(key))
            .filter(|(view, _)| view == feature_view)
            .map(|(_, entities)| entities)
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Drops every record whose storage-level TTL has passed
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut records = recover_write(&self.records, "InMemoryOnlineStore")?;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let purged = before - records.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired online records");
        }
        Ok(purged)
    }
}

#[async_trait]
impl OnlineStore for InMemoryOnlineStore {
    async fn get_online_features(
        &self,
        feature_view: &str,
        entity_keys: &[Vec<EntityKey>],
    ) -> Result<Vec<Option<FeatureRow>>> {
        if entity_keys.is_empty() {
            return Ok(vec![]);
        }

        let now = Instant::now();
        let records = recover_read(&self.records, "InMemoryOnlineStore")?;

        Ok(entity_keys
            .iter()
            .map(|keys| {
                records
                    .get(&build_online_key(feature_view, keys))
                    .filter(|record| !record.is_expired(now))
                    .map(|record| record.row.clone())
            })
            .collect())
    }

    async fn write_online_features(
        &self,
        feature_view: &str,
        rows: Vec<FeatureRow>,
        config: OnlineWriteConfig,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let expires_at = config.ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        let rows_written = rows.len();

        let mut records = recover_write(&self.records, "InMemoryOnlineStore")?;
        for row in rows {
            let key = build_online_key(feature_view, &row.entities);
            records.insert(key, StoredRecord { row, expires_at });
        }

        tracing::debug!(
            feature_view = feature_view,
            rows_written,
            "In-memory write complete"
        );

        Ok(())
    }

    async fn delete_online_features(
        &self,
        feature_view: &str,
        entity_keys: &[Vec<EntityKey>],
    ) -> Result<()> {
        if entity_keys.is_empty() {
            return Ok(());
        }

        let mut records = recover_write(&self.records, "InMemoryOnlineStore")?;
        for keys in entity_keys {
            records.remove(&build_online_key(feature_view, keys));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let _records = recover_read(&self.records, "InMemoryOnlineStore")?;
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
