//! Core engines
//!
//! Backup, restore, verify and retention, each operating on a `DatasetStore`
//! handed in by the caller.

mod backup;
mod prune;
mod restore;
mod verify;

#[cfg(test)]
pub(crate) mod test_support;

pub use backup::*;
pub use prune::*;
pub use restore::*;
pub use verify::*;

use serde::Serialize;

/// A file that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    /// Manifest path
    pub path: String,
    /// Error description
    pub error: String,
}

impl FileFailure {
    /// Create a failure record
    pub fn new(path: impl Into<String>, error: impl ToString) -> Self {
        Self {
            path: path.into(),
            error: error.to_string(),
        }
    }
}

/// Build the worker pool used by an engine
pub(crate) fn build_pool(threads: usize) -> crate::error::Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(crate::config::effective_threads(threads))
        .build()
        .map_err(|e| crate::error::BackupError::config(format!("Thread pool error: {}", e)))
}
