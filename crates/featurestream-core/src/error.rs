//! Error types for featurestream
//!
//! Every fallible operation in the workspace returns [`Result`]. Errors are
//! grouped into the families callers branch on:
//!
//! - **Validation**: a definition was rejected by `apply` (nothing committed)
//! - **Schema mismatch**: a row batch violated a transform or view contract
//! - **Not found**: a serve-time reference could not be resolved
//! - **Storage / serialization**: the backing store or codec failed
//!
//! Rows dropped by the watermark are *not* errors; they are counted in
//! `IngestOutcome::late_rows_dropped`.

use thiserror::Error;

/// Result type alias used throughout featurestream
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors that can occur in featurestream
#[derive(Error, Debug)]
pub enum Error {
    /// A definition passed to `apply` was rejected
    ///
    /// The registry is left exactly as it was before the call.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A row batch did not satisfy a transform or feature view contract
    ///
    /// Raised at invocation time only: column availability can't be known
    /// until real batches arrive.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Feature view was not found in the registry
    #[error("Feature view '{0}' not found")]
    FeatureViewNotFound(String),

    /// Entity was not found in the registry
    #[error("Entity '{0}' not found")]
    EntityNotFound(String),

    /// Feature column is not produced by the feature view
    #[error("Feature column '{0}' not found in feature view '{1}'")]
    FeatureColumnNotFound(String, String),

    /// Entity column is missing from an entity row
    #[error("Entity column '{0}' is required but was not provided")]
    MissingEntityColumn(String),

    /// Feature reference is not of the form `view:feature`
    #[error("Invalid feature reference '{0}' (expected 'feature_view:feature')")]
    InvalidFeatureReference(String),

    /// Storage backend error (registry database, online store)
    #[error("Storage error: {0}")]
    StorageError(#[from] anyhow::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input from user
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error - indicates a bug
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Reasons an `apply` call is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A feature view references an entity that is neither committed nor
    /// part of the same `apply` call
    #[error("feature view '{view}' references unknown entity '{entity}'")]
    UnresolvedEntity { view: String, entity: String },

    /// An aggregation reads a column that is not in the view's schema
    #[error("aggregation in feature view '{view}' references column '{column}' which is not in the schema")]
    UnknownAggregationColumn { view: String, column: String },

    /// A stream feature view was declared over a non-stream source
    #[error("feature view '{view}' must use a stream source, got batch source '{source_name}'")]
    NotAStreamSource { view: String, source_name: String },

    /// Two different definitions share a name within one object kind
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: String, name: String },

    /// Any other structural problem with a definition
    #[error("invalid definition of '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },
}

impl Error {
    /// Creates a ConfigError from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Creates an InvalidInput error from a string
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates an InternalError from a string
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Creates a SchemaMismatch error from a string
    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    /// True for the serve-time "could not resolve" family
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FeatureViewNotFound(_)
                | Self::EntityNotFound(_)
                | Self::FeatureColumnNotFound(_, _)
                | Self::MissingEntityColumn(_)
                | Self::InvalidFeatureReference(_)
        )
    }

    /// True when `apply` rejected a definition
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl ValidationError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
