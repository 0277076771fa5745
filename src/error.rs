//! Error types for backup_manager
//!
//! `BackupError` is the run-level error returned by the engines and the CLI.
//! `StoreError` is produced by the remote store layer and classifies failures
//! as missing, retryable, exhausted or fatal.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for backup, restore and verify operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Local filesystem error
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local path not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// No manifest has been committed for the dataset
    #[error("No manifest found for dataset '{dataset}'")]
    ManifestNotFound { dataset: String },

    /// Downloaded content does not match the recorded digest
    #[error("Integrity check failed for '{path}': expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    /// Remote store unreachable after the retry budget was exhausted
    #[error("Remote store unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    /// Remote store error that is neither missing nor exhausted
    #[error("Remote store error: {0}")]
    Store(StoreError),

    /// Manifest parsing/validation error
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path rejected (absolute, escaping the root, or not representable)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// File changed between scanning and reading it for upload
    #[error("File changed during backup: {0}")]
    ContentChanged(String),

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl BackupError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an integrity error
    pub fn integrity(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ManifestNotFound { .. } | Self::Integrity { .. } => 1,
            _ => 2,
        }
    }
}

/// Result type alias for backup_manager operations
pub type Result<T> = std::result::Result<T, BackupError>;

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        BackupError::Manifest(err.to_string())
    }
}

impl From<StoreError> for BackupError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { attempts, message } => {
                BackupError::Unavailable { attempts, message }
            }
            other => BackupError::Store(other),
        }
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| BackupError::io(path, e))
    }
}

/// Error produced by a remote store operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Retryable failure (network, throttling, server-side 5xx)
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// Retry budget exhausted
    #[error("Store unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    /// Non-retryable failure (access denied, malformed request, local I/O)
    #[error("Store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the object was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Result<()> = Err(io_err).with_path("/test/path");
        match err {
            Err(BackupError::Io { path, .. }) => assert_eq!(path, PathBuf::from("/test/path")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unavailable_store_error_maps_to_run_error() {
        let err: BackupError = StoreError::Unavailable {
            attempts: 5,
            message: "connection refused".to_string(),
        }
        .into();
        assert!(matches!(err, BackupError::Unavailable { attempts: 5, .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_codes() {
        let missing = BackupError::ManifestNotFound {
            dataset: "knowledge".to_string(),
        };
        assert_eq!(missing.exit_code(), 1);

        let integrity = BackupError::integrity("a.txt", "aa", "bb");
        assert_eq!(integrity.exit_code(), 1);

        assert_eq!(BackupError::config("bad").exit_code(), 2);
    }

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::Transient("timeout".into()).is_transient());
        assert!(!StoreError::Fatal("denied".into()).is_transient());
        assert!(StoreError::NotFound("k".into()).is_not_found());
    }
}
