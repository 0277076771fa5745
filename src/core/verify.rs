//! Read-only comparison of a local tree against the committed manifest

use crate::error::Result;
use crate::fs::{ManifestBuilder, ScanConfig, SkippedPath};
use crate::storage::DatasetStore;
use crate::sync::DriftReport;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Verify operation result
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    /// Dataset identifier
    pub dataset: String,
    /// Verified directory
    pub root: PathBuf,
    /// Version id of the manifest compared against
    pub version: String,
    /// Path partition
    pub drift: DriftReport,
    /// Paths the scanner left out
    pub skipped: Vec<SkippedPath>,
    /// Total duration
    pub duration: Duration,
}

impl VerifyReport {
    /// Process exit code: 1 when the tree drifted
    pub fn exit_code(&self) -> i32 {
        i32::from(self.drift.has_drift())
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Verify Summary ===");
        println!("Dataset:   {}", self.dataset);
        println!("Version:   {}", self.version);
        println!("Root:      {}", self.root.display());
        if !self.skipped.is_empty() {
            println!("Skipped:   {}", self.skipped.len());
        }
        println!("Duration:  {:.2?}", self.duration);
        println!();
        self.drift.print();
        if !self.drift.has_drift() {
            println!("\nLocal tree matches the last backup");
        }
    }
}

/// Compares a local tree with the dataset's current manifest
pub struct Verifier {
    store: DatasetStore,
    config: ScanConfig,
}

impl Verifier {
    /// Create a verifier
    pub fn new(store: DatasetStore, config: ScanConfig) -> Self {
        Self { store, config }
    }

    /// Scan `root` and diff it against the remote manifest.
    ///
    /// The local tree is hashed with the remote manifest's algorithm so
    /// digests are comparable whatever `--hash` says. Nothing is written.
    pub fn verify(&self, root: &Path) -> Result<VerifyReport> {
        let start_time = Instant::now();
        let remote = self.store.require_manifest()?;

        let config = ScanConfig {
            algorithm: remote.algorithm,
            ..self.config.clone()
        };
        let scan = ManifestBuilder::new(config)?.build(root, self.store.dataset())?;
        let drift = DriftReport::compute(&scan.manifest, &remote);

        tracing::info!(
            added = drift.added.len(),
            removed = drift.removed.len(),
            modified = drift.modified.len(),
            unchanged = drift.unchanged.len(),
            "Verified {} against {}",
            root.display(),
            remote.version_id()
        );

        Ok(VerifyReport {
            dataset: remote.dataset.clone(),
            root: root.to_path_buf(),
            version: remote.version_id(),
            drift,
            skipped: scan.skipped,
            duration: start_time.elapsed(),
        })
    }
}
