//! # featurestream core library
//!
//! Shared foundation of the featurestream crates: the value model, object
//! definitions, row transformations, the windowed aggregation engine and the
//! online store interface.
//!
//! Everything here is in-process and free of I/O. The registry crate adds
//! durable storage of definitions; the online crate wires ingestion and
//! serving together.
//!
//! ## Key Components
//!
//! - **Definitions**: [`Entity`], [`Field`], [`DataSource`], [`Aggregation`],
//!   [`StreamFeatureView`]
//! - **Transform stage**: [`Transformation`] built from [`Expr`] graphs
//! - **Aggregation engine**: [`AggregationEngine`] with per-view watermarks
//! - **Online store**: the [`OnlineStore`] trait and its key encoding
//! - **Errors**: [`Error`] and [`ValidationError`]
//!
//! ## Example Usage
//!
//! ```
//! use featurestream_core::prelude::*;
//! use std::time::Duration;
//!
//! let driver = Entity::new("driver", vec!["driver_id"]);
//! let source = StreamSource::new("kafka", "driver_events", "event_timestamp", MessageFormat::Json {
//!     schema_json: String::new(),
//! });
//! let view = StreamFeatureView::new("driver_stats", source)
//!     .with_entities([driver.name.clone()])
//!     .with_schema(vec![Field::new("trips", ValueType::Int64)])
//!     .with_aggregation(Aggregation::new("trips", AggregationFunction::Sum, Duration::from_secs(3600)));
//!
//! validation::validate_stream_feature_view(&view, |name| (name == "driver").then_some(&driver))
//!     .unwrap();
//! ```

pub use aggregation::{Aggregation, AggregationFunction};
pub use batch::{Column, RowBatch, RowBatchBuilder};
pub use data_source::{BatchSource, DataSource, MessageFormat, StreamSource};
pub use engine::{AggregationEngine, IngestOutcome, ViewStats};
pub use entity::Entity;
pub use error::{Error, Result, ValidationError};
pub use expr::{BinaryOperator, Expr, ScalarFunction, UnaryOperator};
pub use feature_view::StreamFeatureView;
pub use field::Field;
pub use online_store::{build_online_key, parse_online_key, OnlineStore, OnlineWriteConfig};
pub use transform::{OutputColumn, Transformation};
pub use types::{EntityKey, FeatureRow, FeatureValue, ValueType};

mod aggregation;
mod batch;
mod data_source;
mod engine;
mod entity;
mod error;
mod expr;
mod feature_view;
mod field;
mod online_store;
mod transform;
mod types;
pub mod validation;
pub mod window;

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Locks a mutex, recovering the guard if a previous holder panicked
///
/// The protected data may be mid-update; callers only keep state that stays
/// consistent at every await/return point.
pub fn recover_mutex<'a, T>(mutex: &'a Mutex<T>, context: &str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().or_else(|poisoned| {
        tracing::warn!(context, "Recovering poisoned mutex");
        Ok(poisoned.into_inner())
    })
}

/// Read-locks an RwLock, recovering from poisoning
pub fn recover_read<'a, T>(lock: &'a RwLock<T>, context: &str) -> Result<RwLockReadGuard<'a, T>> {
    lock.read().or_else(|poisoned| {
        tracing::warn!(context, "Recovering poisoned read lock");
        Ok(poisoned.into_inner())
    })
}

/// Write-locks an RwLock, recovering from poisoning
pub fn recover_write<'a, T>(
    lock: &'a RwLock<T>,
    context: &str,
) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write().or_else(|poisoned| {
        tracing::warn!(context, "Recovering poisoned write lock");
        Ok(poisoned.into_inner())
    })
}

/// Commonly used imports: `use featurestream_core::prelude::*`
pub mod prelude {
    pub use crate::validation;
    pub use crate::{
        Aggregation, AggregationEngine, AggregationFunction, BatchSource, DataSource, Entity,
        EntityKey, Error, Expr, FeatureRow, FeatureValue, Field, MessageFormat, OnlineStore,
        Result, RowBatch, StreamFeatureView, StreamSource, Transformation, ValidationError,
        ValueType,
    };
}
