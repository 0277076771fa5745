//! Version retention and blob garbage collection
//!
//! Prune assumes no backup of the same dataset is running: blobs uploaded by
//! an uncommitted backup are unreferenced and would be collected.

use crate::config::{Compression, PruneConfig};
use crate::error::{BackupError, Result};
use crate::hash::Digest;
use crate::storage::DatasetStore;
use crate::sync::Manifest;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// A retained manifest version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    /// Version id
    pub id: String,
    /// Files in the manifest
    pub files: usize,
    /// Logical size of the manifest
    pub total_size: u64,
    /// Host that produced it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Whether the current pointer names this version
    pub current: bool,
}

/// Retained versions of a dataset, newest first
pub fn list_versions(store: &DatasetStore) -> Result<Vec<VersionInfo>> {
    let current = store.load_manifest()?.map(|m| m.version_id());
    let mut versions = Vec::new();
    for id in store.list_manifest_versions()?.into_iter().rev() {
        let manifest = store.load_manifest_version(&id)?;
        versions.push(VersionInfo {
            current: current.as_deref() == Some(id.as_str()),
            files: manifest.file_count(),
            total_size: manifest.total_size(),
            host: manifest.host,
            id,
        });
    }
    Ok(versions)
}

/// Print a version listing
pub fn print_versions(dataset: &str, versions: &[VersionInfo]) {
    println!("=== Versions of {} ===", dataset);
    if versions.is_empty() {
        println!("(none)");
        return;
    }
    for version in versions {
        println!(
            "{} {:<24} {:>8} files  {:>10}{}",
            if version.current { "*" } else { " " },
            version.id,
            version.files,
            humansize::format_size(version.total_size, humansize::BINARY),
            version
                .host
                .as_deref()
                .map(|h| format!("  ({})", h))
                .unwrap_or_default()
        );
    }
}

/// Prune operation result
#[derive(Debug, Clone, Serialize)]
pub struct PruneReport {
    /// Dataset identifier
    pub dataset: String,
    /// Plan only, nothing was deleted
    pub dry_run: bool,
    /// Versions kept, newest first
    pub versions_kept: Vec<String>,
    /// Versions deleted (or that would be), oldest first
    pub versions_deleted: Vec<String>,
    /// Blobs still referenced
    pub blobs_kept: u64,
    /// Unreferenced blobs deleted (or that would be)
    pub blobs_deleted: u64,
    /// Total duration
    pub duration: Duration,
}

impl PruneReport {
    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        0
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Prune Summary ===");
        println!("Dataset:           {}", self.dataset);
        if self.dry_run {
            println!("Mode:              dry run (nothing deleted)");
        }
        println!("Versions kept:     {}", self.versions_kept.len());
        println!("Versions deleted:  {}", self.versions_deleted.len());
        for version in &self.versions_deleted {
            println!("  - {}", version);
        }
        println!("Blobs kept:        {}", self.blobs_kept);
        println!("Blobs deleted:     {}", self.blobs_deleted);
        println!("Duration:          {:.2?}", self.duration);
    }
}

/// Applies a retention policy to a dataset
pub struct Pruner {
    store: DatasetStore,
    config: PruneConfig,
}

impl Pruner {
    /// Create a pruner, rejecting `keep == 0`
    pub fn new(store: DatasetStore, config: PruneConfig) -> Result<Self> {
        if config.keep == 0 {
            return Err(BackupError::config("--keep must be at least 1"));
        }
        Ok(Self { store, config })
    }

    /// Delete versions beyond the newest `keep`, then unreferenced blobs.
    ///
    /// Every retained manifest is loaded before anything is deleted, so an
    /// unreadable version aborts the run with the store untouched.
    pub fn prune(&self) -> Result<PruneReport> {
        let start_time = Instant::now();
        let current = self.store.load_manifest()?;
        let current_id = current.as_ref().map(Manifest::version_id);

        let versions = self.store.list_manifest_versions()?;
        let split = versions.len().saturating_sub(self.config.keep);
        let (older, newest) = versions.split_at(split);

        let doomed: Vec<String> = older
            .iter()
            .filter(|id| current_id.as_deref() != Some(id.as_str()))
            .cloned()
            .collect();
        let kept: Vec<String> = versions
            .iter()
            .rev()
            .filter(|id| !doomed.contains(id))
            .cloned()
            .collect();

        let mut referenced: BTreeSet<(Digest, Compression)> = BTreeSet::new();
        if let Some(manifest) = &current {
            add_references(&mut referenced, manifest);
        }
        for id in newest {
            add_references(&mut referenced, &self.store.load_manifest_version(id)?);
        }

        let unreferenced: Vec<(Digest, Compression)> = self
            .store
            .list_all_blobs()?
            .into_iter()
            .filter(|blob| !referenced.contains(blob))
            .collect();

        tracing::info!(
            keep = self.config.keep,
            versions = versions.len(),
            deleting_versions = doomed.len(),
            deleting_blobs = unreferenced.len(),
            "Pruning dataset {}",
            self.store.dataset()
        );

        if !self.config.dry_run {
            for id in &doomed {
                self.store.delete_manifest_version(id)?;
                tracing::debug!("Deleted manifest version {}", id);
            }
            for (digest, compression) in &unreferenced {
                self.store.delete_blob(digest, *compression)?;
                tracing::debug!("Deleted blob {}", digest.short());
            }
        }

        Ok(PruneReport {
            dataset: self.store.dataset().to_string(),
            dry_run: self.config.dry_run,
            versions_kept: kept,
            versions_deleted: doomed,
            blobs_kept: referenced.len() as u64,
            blobs_deleted: unreferenced.len() as u64,
            duration: start_time.elapsed(),
        })
    }
}

fn add_references(referenced: &mut BTreeSet<(Digest, Compression)>, manifest: &Manifest) {
    referenced.extend(
        manifest
            .digests()
            .into_iter()
            .map(|digest| (digest, manifest.compression)),
    );
}
