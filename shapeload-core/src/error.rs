//! Error types for shapeload operations

use crate::deadline::Stage;
use crate::key::LoaderKey;
use thiserror::Error;

/// Connection gate errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("not logged in")]
    LoggedOut,

    #[error("connection gate dropped before it settled")]
    Closed,
}

/// Shape readiness and sync errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Readiness check for shape {shape} failed: {reason}")]
    ReadinessFailed { shape: String, reason: String },

    #[error("Sync of shape {shape} failed: {reason}")]
    SyncFailed { shape: String, reason: String },

    #[error("Background sync task failed: {reason}")]
    BackgroundTaskFailed { reason: String },
}

/// Query execution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Query {query} failed: {reason}")]
    Failed { query: String, reason: String },

    #[error("Query rejected: {0}")]
    Rejected(String),
}

/// Result cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Queries not found for {key}.")]
    DefinitionsNotFound { key: LoaderKey },

    #[error(
        "precached query results not found for {key}. Check your loader code to make sure it's caching correctly"
    )]
    SnapshotNotFound { key: LoaderKey },

    #[error(
        "Query names for {key} do not match their results: missing {missing:?}, unexpected {unexpected:?}"
    )]
    ParityMismatch {
        key: LoaderKey,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Session initialization and connectivity errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to open database {name}: {reason}")]
    DriverOpen { name: String, reason: String },

    #[error("Sync engine activation failed: {reason}")]
    Activation { reason: String },

    #[error("Connect failed: {reason}")]
    Connect { reason: String },

    #[error("Token refresh failed: {reason}")]
    TokenRefresh { reason: String },

    #[error("Live subscription for {query} failed: {reason}")]
    LiveSubscription { query: String, reason: String },
}

/// Deadline and cancellation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeadlineError {
    #[error("Deadline elapsed while waiting on {stage}")]
    Elapsed { stage: Stage },

    #[error("Cancelled while waiting on {stage}")]
    Cancelled { stage: Stage },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or SHAPELOAD_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file: {0}")]
    Io(String),

    #[error("Failed to parse config TOML: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all shapeload errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Deadline error: {0}")]
    Deadline(#[from] DeadlineError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LoaderError {
    /// True when the error is one of the two read-before-load conditions.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LoaderError::Cache(CacheError::DefinitionsNotFound { .. })
                | LoaderError::Cache(CacheError::SnapshotNotFound { .. })
        )
    }
}

/// Result type alias for shapeload operations.
pub type LoaderResult<T> = Result<T, LoaderError>;
