//! Error types for the DLC bundle service

use thiserror::Error;

/// Main error type for bundle operations
#[derive(Error, Debug)]
pub enum BundleError {
    /// Requested bundle does not exist in scope
    #[error("Bundle not found: {resource}")]
    NotFound { resource: String },

    /// Caller supplied malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Name already taken in (gamespace, version)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Underlying storage engine failure
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Artifact directory or file could not be prepared or written
    #[error("Storage error at {path}: {message}")]
    Storage { path: String, message: String },

    /// Upload producer failed mid-stream
    #[error("Producer error: {0}")]
    Producer(String),
}

impl BundleError {
    /// Not found error for a bundle id
    pub fn not_found_id(gamespace_id: i64, bundle_id: i64) -> Self {
        BundleError::NotFound {
            resource: format!("bundle {} in gamespace {}", bundle_id, gamespace_id),
        }
    }

    /// Not found error for a bundle name
    pub fn not_found_name(gamespace_id: i64, version_id: i64, name: &str) -> Self {
        BundleError::NotFound {
            resource: format!(
                "bundle '{}' of version {} in gamespace {}",
                name, version_id, gamespace_id
            ),
        }
    }

    /// Storage error for a filesystem path
    pub fn storage(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        BundleError::Storage {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BundleError::NotFound { .. })
    }
}

/// Result type alias for bundle operations
pub type Result<T> = std::result::Result<T, BundleError>;

/// Database specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Stored row could not be decoded
    #[error("Malformed row in {table}: {message}")]
    MalformedRow { table: String, message: String },
}

/// Configuration specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Validation error
    #[error("Configuration validation error: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// Missing required field
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// Invalid value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

impl From<DatabaseError> for BundleError {
    fn from(err: DatabaseError) -> Self {
        BundleError::OperationFailed(err.to_string())
    }
}
