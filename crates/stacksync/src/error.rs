//! Error types for the synchronization engine.

use thiserror::Error;

/// Main error type for migration and verification operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fatal registration error raised while freezing the type registry.
    ///
    /// These indicate a programming or deployment mistake (missing uniqueness
    /// constraint, out-of-order primary types, unknown type lookups) and are
    /// never retried at runtime.
    #[error("Registration error: {0}")]
    Registration(String),

    /// A request failed validation before any storage I/O was attempted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A storage operation failed. Retry policy belongs to the orchestrator.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A long-running loop observed the cooperative cancellation flag.
    ///
    /// Distinct from [`SyncError::Storage`] so that an orchestrator can
    /// resume from the last completed unit. Partial progress is retained.
    #[error("Terminated by operator")]
    Interrupted,

    /// IO error (backup stream operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SyncError {
    /// Create a Registration error.
    pub fn registration(message: impl Into<String>) -> Self {
        SyncError::Registration(message.into())
    }

    /// Create a Validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    /// Create a Storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        SyncError::Storage(message.into())
    }
}

#[cfg(feature = "mysql")]
impl From<mysql_async::Error> for SyncError {
    fn from(e: mysql_async::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

/// Convenience Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
