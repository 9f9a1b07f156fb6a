//! Data source declarations
//!
//! Sources describe where rows come from. The core never connects to them;
//! connectors outside this workspace read the source and push row batches.
//!
//! - **BatchSource**: a file or table, used for replay/backfill
//! - **StreamSource**: a message-bus topic, optionally backed by a batch source
//!   for replay, with a watermark bounding accepted lateness

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A source of rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSource {
    Batch(BatchSource),
    Stream(StreamSource),
}

impl DataSource {
    pub fn name(&self) -> &str {
        match self {
            Self::Batch(source) => &source.name,
            Self::Stream(source) => &source.name,
        }
    }

    pub fn timestamp_field(&self) -> &str {
        match self {
            Self::Batch(source) => &source.timestamp_field,
            Self::Stream(source) => &source.timestamp_field,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamSource> {
        match self {
            Self::Stream(source) => Some(source),
            Self::Batch(_) => None,
        }
    }
}

impl From<BatchSource> for DataSource {
    fn from(source: BatchSource) -> Self {
        Self::Batch(source)
    }
}

impl From<StreamSource> for DataSource {
    fn from(source: StreamSource) -> Self {
        Self::Stream(source)
    }
}

/// File or table backed source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSource {
    pub name: String,

    /// Path or table identifier (e.g. "s3://bucket/driver_stats.parquet")
    pub path: String,

    pub timestamp_field: String,

    #[serde(default)]
    pub created_timestamp_column: Option<String>,
}

impl BatchSource {
    pub fn new(path: impl Into<String>, timestamp_field: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: path.clone(),
            path,
            timestamp_field: timestamp_field.into(),
            created_timestamp_column: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Serialization format of stream messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum MessageFormat {
    Avro { schema_json: String },
    Json { schema_json: String },
    Protobuf { class_path: String },
}

/// Message-bus backed source
///
/// `watermark` bounds how late an event may arrive relative to the highest
/// timestamp already seen before it is excluded from aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource {
    pub name: String,

    /// Connection descriptor (e.g. Kafka bootstrap servers)
    pub bootstrap_servers: String,

    pub message_format: MessageFormat,

    /// Topic or channel name
    pub topic: String,

    pub timestamp_field: String,

    /// Batch source holding the same data, used for replay
    #[serde(default)]
    pub batch_source: Option<BatchSource>,

    /// Maximum accepted lateness
    #[serde(default)]
    pub watermark: Duration,
}

impl StreamSource {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        timestamp_field: impl Into<String>,
        message_format: MessageFormat,
    ) -> Self {
        Self {
            name: name.into(),
            bootstrap_servers: String::new(),
            message_format,
            topic: topic.into(),
            timestamp_field: timestamp_field.into(),
            batch_source: None,
            watermark: Duration::ZERO,
        }
    }

    pub fn with_bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = servers.into();
        self
    }

    pub fn with_batch_source(mut self, batch_source: BatchSource) -> Self {
        self.batch_source = Some(batch_source);
        self
    }

    pub fn with_watermark(mut self, watermark: Duration) -> Self {
        self.watermark = watermark;
        self
    }
}
