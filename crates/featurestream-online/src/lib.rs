//! featurestream online: ingestion and feature serving
//!
//! This crate turns registered stream feature views into servable features.
//! Batches pushed by an upstream connector are transformed, aggregated over
//! their time windows and materialized into an online store, from which the
//! latest values are served per entity key.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           FeatureStore                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │   apply() ──────────► FeatureRegistry (SQLite, snapshot)          │
//! │                              │ definitions                        │
//! │                              ▼                                    │
//! │   push(batch) ──► transform ─► conform ─► aggregate ─► write      │
//! │                                                         │         │
//! │                                                         ▼         │
//! │   get_online_features() ◄──────────────────── Online Store        │
//! │                                                                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use featurestream_online::{FeatureStore, OnlineRequestOptions};
//!
//! let store = FeatureStore::in_memory().await?;
//! store.apply(vec![driver.into(), driver_stats.into()]).await?;
//!
//! store.push("driver_stats", batch).await?;
//!
//! let response = store
//!     .get_online_features(
//!         &["driver_stats:trips_max"],
//!         &[HashMap::from([("driver_id".to_string(), 1001i64.into())])],
//!         &OnlineRequestOptions::default(),
//!     )
//!     .await?;
//! ```

pub use featurestream_core::{
    build_online_key, parse_online_key, EntityKey, FeatureRow, FeatureValue, OnlineStore,
    OnlineWriteConfig,
};

pub mod config;
pub use config::FeatureStoreConfig;

pub mod feature_store;
pub use feature_store::FeatureStore;

pub mod ingest;
pub use ingest::{IngestConfig, IngestPipeline, IngestResult};

pub mod memory_store;
pub use memory_store::InMemoryOnlineStore;

pub mod observability;

pub mod serving;
pub use serving::{FeatureRef, FeatureVector, OnlineRequestOptions, OnlineResponse};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_re_exports() {
        let key = EntityKey::new("driver_id", "1001");
        assert_eq!(key.name, "driver_id");

        let online_key = build_online_key("driver_stats", std::slice::from_ref(&key));
        assert!(online_key.contains("driver_id=1001"));
        assert_eq!(
            parse_online_key(&online_key),
            Some(("driver_stats".to_string(), vec![key]))
        );
    }
}
