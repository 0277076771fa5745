//! # backup_manager - content-addressed directory backups
//!
//! backup_manager stores a directory tree in S3-compatible object storage as
//! a set of content-addressed blobs plus one manifest per dataset. Identical
//! content is stored once, unchanged content is never uploaded twice, and a
//! manifest is only committed after every blob it references is in place.
//!
//! ## Features
//!
//! - **Deduplicated uploads**: blobs are keyed by their BLAKE3 or SHA-256 digest
//! - **Atomic commits**: a failed or interrupted backup keeps the previous manifest
//! - **Verified restores**: every downloaded blob is checked before it is written
//! - **Drift reports**: compare a local tree with the last backup without writing
//! - **Retention**: keep the newest N manifest versions and collect unused blobs
//! - **Bounded retries**: transient store failures back off exponentially
//!
//! ## Quick Start
//!
//! ```no_run
//! use backup_manager::config::{BackupConfig, RestoreConfig};
//! use backup_manager::core::{BackupEngine, RestoreEngine};
//! use backup_manager::storage::{DatasetStore, LocalStore, RetryPolicy, RetryingStore};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let local = LocalStore::new("/var/backups/store").unwrap();
//! let remote = Arc::new(RetryingStore::new(local, RetryPolicy::default()));
//! let store = DatasetStore::new(remote, None, "knowledge").unwrap();
//!
//! let report = BackupEngine::new(store.clone(), BackupConfig::default())
//!     .run(Path::new("/data/knowledge"))
//!     .unwrap();
//! report.print_summary();
//!
//! let restored = RestoreEngine::new(store, RestoreConfig::default())
//!     .run(Path::new("/tmp/knowledge"))
//!     .unwrap();
//! restored.print_summary();
//! ```
//!
//! ## S3
//!
//! ```no_run
//! use backup_manager::storage::{DatasetStore, RetryPolicy, RetryingStore, S3Config, S3Store};
//! use std::sync::Arc;
//!
//! let config = S3Config {
//!     bucket: "backups".to_string(),
//!     ..S3Config::from_env()
//! };
//! let s3 = S3Store::new(config).unwrap();
//! let remote = Arc::new(RetryingStore::new(s3, RetryPolicy::default()));
//! let store = DatasetStore::new(remote, Some("prod"), "knowledge").unwrap();
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod hash;
pub mod progress;
pub mod storage;
pub mod sync;

pub use crate::config::{BackupConfig, CliArgs, Compression, HashAlgorithm, PruneConfig, RestoreConfig};
pub use crate::core::{BackupEngine, BackupReport, Pruner, RestoreEngine, RestoreReport, Verifier, VerifyReport};
pub use crate::error::{BackupError, Result, StoreError};
pub use crate::storage::{DatasetStore, RemoteStore};

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{BackupConfig, Compression, HashAlgorithm, PruneConfig, RestoreConfig};
    pub use crate::core::{BackupEngine, Pruner, RestoreEngine, Verifier};
    pub use crate::error::{BackupError, Result};
    pub use crate::hash::{hash_bytes, hash_file, Digest};
    pub use crate::progress::ProgressReporter;
    pub use crate::storage::{DatasetStore, LocalStore, MemoryStore, RemoteStore, RetryPolicy, RetryingStore};
    pub use crate::sync::{DriftReport, Manifest, ManifestEntry};
}
