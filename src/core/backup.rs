//! Backup engine
//!
//! Scans a root, uploads every blob the remote does not know yet and commits
//! a new manifest. A manifest is committed only when every file made it:
//! any upload failure or failure-class scan skip leaves the previous
//! manifest in place, so the remote never references a missing blob.

use super::{build_pool, FileFailure, PruneReport, Pruner};
use crate::config::{BackupConfig, Compression, PruneConfig, VerifyPolicy};
use crate::error::{BackupError, IoResultExt, Result};
use crate::fs::{ManifestBuilder, ScanConfig, SkippedPath};
use crate::hash::{Digest, HashingReader};
use crate::progress::ProgressReporter;
use crate::storage::{BlobCodec, DatasetStore};
use crate::sync::{DriftReport, Manifest, ManifestEntry};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Why a backup stopped without committing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// The store stayed unreachable through the retry budget
    Unavailable { attempts: u32, message: String },
    /// The cancellation flag was raised
    Cancelled,
    /// The verify pre-check found paths that exist only remotely
    RemovalsBlocked { removed: usize },
}

impl AbortReason {
    /// Process exit code for an aborted run
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RemovalsBlocked { .. } => 1,
            Self::Unavailable { .. } | Self::Cancelled => 2,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { attempts, message } => {
                write!(f, "remote unavailable after {} attempts: {}", attempts, message)
            }
            Self::Cancelled => write!(f, "cancelled"),
            Self::RemovalsBlocked { removed } => {
                write!(f, "{} remote paths missing locally (--block-on-removals)", removed)
            }
        }
    }
}

/// Backup operation result
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    /// Dataset identifier
    pub dataset: String,
    /// Backed up directory
    pub root: PathBuf,
    /// Plan only, nothing was written
    pub dry_run: bool,
    /// Files in the local manifest
    pub files_scanned: u64,
    /// Files whose content was uploaded by this run
    pub files_uploaded: u64,
    /// Files whose content was already stored or shared with another file
    pub files_deduplicated: u64,
    /// Paths left out of the manifest
    pub files_skipped: u64,
    /// Files that failed (upload failures and failure-class skips)
    pub files_failed: u64,
    /// Distinct blobs written
    pub blobs_uploaded: u64,
    /// Logical size of the local manifest
    pub bytes_scanned: u64,
    /// Blob body bytes sent to the store
    pub bytes_transferred: u64,
    /// Total duration
    pub duration: Duration,
    /// Version id of the committed manifest
    pub committed_version: Option<String>,
    /// Set when the run stopped early
    pub aborted: Option<AbortReason>,
    /// Pre-check drift, when `--verify` was given and a remote manifest existed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftReport>,
    /// Paths the scanner left out
    pub skipped: Vec<SkippedPath>,
    /// Per-file failures
    pub failures: Vec<FileFailure>,
    /// Retention applied after the commit, when `keep` was set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruned: Option<PruneReport>,
    /// Why retention failed after a successful commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_error: Option<String>,
}

impl BackupReport {
    fn new(dataset: &str, root: &Path, dry_run: bool) -> Self {
        Self {
            dataset: dataset.to_string(),
            root: root.to_path_buf(),
            dry_run,
            files_scanned: 0,
            files_uploaded: 0,
            files_deduplicated: 0,
            files_skipped: 0,
            files_failed: 0,
            blobs_uploaded: 0,
            bytes_scanned: 0,
            bytes_transferred: 0,
            duration: Duration::ZERO,
            committed_version: None,
            aborted: None,
            drift: None,
            skipped: Vec::new(),
            failures: Vec::new(),
            pruned: None,
            retention_error: None,
        }
    }

    /// Check if the backup was completely successful
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failures.is_empty()
    }

    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        match &self.aborted {
            Some(reason) => reason.exit_code(),
            None if !self.failures.is_empty() || self.retention_error.is_some() => 1,
            None => 0,
        }
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Backup Summary ===");
        println!("Dataset:         {}", self.dataset);
        println!("Root:            {}", self.root.display());
        if self.dry_run {
            println!("Mode:            dry run (nothing written)");
        }
        println!("Files scanned:   {}", self.files_scanned);
        println!("Uploaded:        {} ({} blobs)", self.files_uploaded, self.blobs_uploaded);
        println!("Deduplicated:    {}", self.files_deduplicated);
        println!("Skipped:         {}", self.files_skipped);
        println!("Failed:          {}", self.files_failed);
        println!("Data scanned:    {}", humansize::format_size(self.bytes_scanned, humansize::BINARY));
        println!("Transferred:     {}", humansize::format_size(self.bytes_transferred, humansize::BINARY));
        println!("Duration:        {:.2?}", self.duration);

        match (&self.committed_version, &self.aborted) {
            (Some(version), _) => println!("Committed:       {}", version),
            (None, Some(reason)) => println!("Not committed:   {}", reason),
            (None, None) if self.dry_run => println!("Not committed:   dry run"),
            (None, None) => println!("Not committed:   {} failures", self.files_failed),
        }

        if let Some(pruned) = &self.pruned {
            println!(
                "Retention:       kept {} versions, deleted {} versions and {} blobs",
                pruned.versions_kept.len(),
                pruned.versions_deleted.len(),
                pruned.blobs_deleted
            );
        }
        if let Some(error) = &self.retention_error {
            println!("Retention:       failed: {}", error);
        }

        if let Some(drift) = &self.drift {
            println!();
            drift.print();
        }

        if !self.failures.is_empty() {
            println!("\nFailures: {}", self.failures.len());
            for failure in &self.failures {
                println!("  {} - {}", failure.path, failure.error);
            }
        }
    }
}

/// Result of uploading one distinct blob
enum BlobOutcome {
    Uploaded { written: bool, bytes: u64 },
    Planned { bytes: u64 },
    Failed(Vec<FileFailure>),
    NotAttempted,
}

/// Main backup engine
pub struct BackupEngine {
    store: DatasetStore,
    config: BackupConfig,
    progress: Option<ProgressReporter>,
    cancelled: AtomicBool,
}

impl BackupEngine {
    /// Create a new backup engine
    pub fn new(store: DatasetStore, config: BackupConfig) -> Self {
        Self {
            store,
            config,
            progress: None,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Cancel the operation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn status(&self, msg: &str) {
        if let Some(progress) = &self.progress {
            progress.set_status(msg);
        }
    }

    /// Back up `root` into the dataset
    pub fn run(&self, root: &Path) -> Result<BackupReport> {
        let start_time = Instant::now();
        let compression = self.config.compression;
        let mut report = BackupReport::new(self.store.dataset(), root, self.config.dry_run);

        self.status("Scanning source directory...");
        let scan = ManifestBuilder::new(self.config.scan_config())?.build(root, self.store.dataset())?;
        report.files_skipped = scan.skipped.len() as u64;
        report.failures.extend(
            scan.failed_skips()
                .map(|s| FileFailure::new(s.path.clone(), &s.reason)),
        );
        let mut manifest = scan.manifest;
        manifest.compression = compression;

        report.files_scanned = manifest.file_count() as u64;
        report.bytes_scanned = manifest.total_size();
        report.skipped = scan.skipped;

        self.status("Loading remote manifest...");
        let remote = match abort_if_unavailable(self.store.load_manifest(), &mut report)? {
            Some(remote) => remote,
            None => return Ok(self.finish(report, start_time)),
        };

        if self.config.verify {
            if let Some(blocked) = self.pre_check(root, &manifest, remote.as_ref(), &mut report)? {
                report.aborted = Some(blocked);
                return Ok(self.finish(report, start_time));
            }
        }

        let known = match abort_if_unavailable(self.known_blobs(remote.as_ref(), compression), &mut report)? {
            Some(known) => known,
            None => return Ok(self.finish(report, start_time)),
        };
        let (pending, deduplicated) = plan_uploads(&manifest, &known);
        report.files_deduplicated = deduplicated;

        if let Some(progress) = &self.progress {
            progress.set_total_files(manifest.file_count() as u64);
            progress.set_total_bytes(pending.values().map(|entries| entries[0].size).sum());
            progress.increment_files(deduplicated);
        }

        tracing::info!(
            files = manifest.file_count(),
            pending_blobs = pending.len(),
            known_blobs = known.len(),
            "Planned backup of {} to {}",
            root.display(),
            self.store.describe()
        );

        self.status("Uploading blobs...");
        let codec = BlobCodec::new(compression, self.config.compression_level);
        let halt = AtomicBool::new(false);
        let unavailable: Mutex<Option<AbortReason>> = Mutex::new(None);

        let pool = build_pool(self.config.threads)?;
        let outcomes: Vec<(usize, BlobOutcome)> = pool.install(|| {
            pending
                .par_iter()
                .map(|(digest, entries)| {
                    let outcome = self.upload_blob(root, digest, entries, &codec, &halt, &unavailable);
                    if let Some(progress) = &self.progress {
                        progress.increment_files(entries.len() as u64);
                    }
                    (entries.len(), outcome)
                })
                .collect()
        });

        for (path_count, outcome) in outcomes {
            let path_count = path_count as u64;
            match outcome {
                BlobOutcome::Uploaded { written: true, bytes } => {
                    report.blobs_uploaded += 1;
                    report.files_uploaded += 1;
                    report.files_deduplicated += path_count - 1;
                    report.bytes_transferred += bytes;
                }
                BlobOutcome::Uploaded { written: false, .. } => {
                    report.files_deduplicated += path_count;
                }
                BlobOutcome::Planned { bytes } => {
                    report.blobs_uploaded += 1;
                    report.files_uploaded += 1;
                    report.files_deduplicated += path_count - 1;
                    report.bytes_transferred += bytes;
                }
                BlobOutcome::Failed(failures) => report.failures.extend(failures),
                BlobOutcome::NotAttempted => {}
            }
        }

        let unavailable = unavailable
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(reason) = unavailable {
            report.aborted = Some(reason);
        } else if self.is_cancelled() {
            report.aborted = Some(AbortReason::Cancelled);
        }

        if report.aborted.is_none() && report.failures.is_empty() && !self.config.dry_run {
            self.status("Committing manifest...");
            if let Some(version) = abort_if_unavailable(self.store.commit_manifest(&manifest), &mut report)? {
                report.committed_version = Some(version);
                if let Some(keep) = self.config.keep {
                    self.apply_retention(keep, &mut report);
                }
            }
        } else if !report.failures.is_empty() {
            tracing::warn!(
                "{} files failed; keeping the previous manifest for dataset {}",
                report.failures.len(),
                self.store.dataset()
            );
        }

        Ok(self.finish(report, start_time))
    }

    /// Prune older versions once the new manifest is committed
    fn apply_retention(&self, keep: usize, report: &mut BackupReport) {
        self.status("Applying retention...");
        let pruned = Pruner::new(self.store.clone(), PruneConfig { keep, dry_run: false })
            .and_then(|pruner| pruner.prune());
        match pruned {
            Ok(pruned) => report.pruned = Some(pruned),
            Err(e) => {
                tracing::error!("Backup committed but retention failed: {}", e);
                report.retention_error = Some(e.to_string());
            }
        }
    }

    fn finish(&self, mut report: BackupReport, start_time: Instant) -> BackupReport {
        report.failures.sort_by(|a, b| a.path.cmp(&b.path));
        report.files_failed = report.failures.len() as u64;
        report.duration = start_time.elapsed();

        if let Some(progress) = &self.progress {
            match (&report.committed_version, &report.aborted) {
                (Some(version), _) => progress.finish_success(&format!("Committed {}", version)),
                (None, Some(reason)) => progress.finish_error(&reason.to_string()),
                (None, None) if report.dry_run => progress.finish_success("Dry run complete"),
                (None, None) => progress.finish_error("Manifest not committed"),
            }
        }
        report
    }

    /// Compare against the remote manifest before uploading
    ///
    /// When the remote manifest was hashed with another algorithm the root is
    /// rescanned with that algorithm, so the digests are comparable.
    fn pre_check(
        &self,
        root: &Path,
        local: &Manifest,
        remote: Option<&Manifest>,
        report: &mut BackupReport,
    ) -> Result<Option<AbortReason>> {
        let Some(remote) = remote else {
            tracing::info!("No remote manifest for {}; nothing to verify", self.store.dataset());
            return Ok(None);
        };

        let drift = if remote.algorithm == local.algorithm {
            DriftReport::compute(local, remote)
        } else {
            tracing::info!(
                "Last backup used {}; rescanning for the pre-check",
                remote.algorithm.name()
            );
            let config = ScanConfig {
                algorithm: remote.algorithm,
                ..self.config.scan_config()
            };
            let rescan = ManifestBuilder::new(config)?.build(root, self.store.dataset())?;
            DriftReport::compute(&rescan.manifest, remote)
        };
        if drift.has_drift() {
            tracing::warn!(
                added = drift.added.len(),
                removed = drift.removed.len(),
                modified = drift.modified.len(),
                "Local tree drifted from the last backup"
            );
        } else {
            tracing::info!("Local tree matches the last backup");
        }

        let removed = drift.removed.len();
        report.drift = Some(drift);

        if self.config.verify_policy == VerifyPolicy::BlockOnRemovals && removed > 0 {
            tracing::error!("Refusing to back up: {} remote paths are missing locally", removed);
            return Ok(Some(AbortReason::RemovalsBlocked { removed }));
        }
        Ok(None)
    }

    /// Digests already stored in the encoding this run writes
    fn known_blobs(&self, remote: Option<&Manifest>, compression: Compression) -> Result<BTreeSet<Digest>> {
        let mut known = self.store.list_blobs(compression)?;
        if let Some(remote) = remote {
            if remote.compression == compression {
                known.extend(remote.digests());
            }
        }
        Ok(known)
    }

    /// Upload one distinct blob, reading it from the first path that still matches
    fn upload_blob(
        &self,
        root: &Path,
        digest: &Digest,
        entries: &[&ManifestEntry],
        codec: &BlobCodec,
        halt: &AtomicBool,
        unavailable: &Mutex<Option<AbortReason>>,
    ) -> BlobOutcome {
        if self.config.dry_run {
            return BlobOutcome::Planned {
                bytes: entries[0].size,
            };
        }

        let mut failures = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            if halt.load(Ordering::SeqCst) || self.is_cancelled() {
                return BlobOutcome::NotAttempted;
            }
            if let Some(progress) = &self.progress {
                progress.set_current_file(&entry.path);
            }

            let content = match read_verified(root, entry, self.config.algorithm) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Cannot upload {}: {}", entry.path, e);
                    failures.push(FileFailure::new(entry.path.clone(), &e));
                    continue;
                }
            };

            let stored = codec
                .encode(&content)
                .and_then(|body| {
                    let bytes = body.len() as u64;
                    self.store
                        .put_blob(digest, codec.compression(), &body)
                        .map(|written| (written, bytes))
                });

            match stored {
                Ok((written, bytes)) => {
                    if let Some(progress) = &self.progress {
                        progress.increment_bytes(entry.size);
                    }
                    tracing::debug!("Stored blob {} from {}", digest.short(), entry.path);
                    // Paths that failed to read still share the stored blob
                    return if failures.is_empty() {
                        BlobOutcome::Uploaded { written, bytes }
                    } else {
                        BlobOutcome::Failed(failures)
                    };
                }
                Err(BackupError::Unavailable { attempts, message }) => {
                    halt.store(true, Ordering::SeqCst);
                    let mut slot = unavailable
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    slot.get_or_insert(AbortReason::Unavailable { attempts, message });
                    return BlobOutcome::NotAttempted;
                }
                Err(e) => {
                    tracing::error!("Upload of blob {} failed: {}", digest.short(), e);
                    failures.extend(
                        entries[idx..]
                            .iter()
                            .map(|rest| FileFailure::new(rest.path.clone(), &e)),
                    );
                    return BlobOutcome::Failed(failures);
                }
            }
        }
        BlobOutcome::Failed(failures)
    }
}

/// Turn an exhausted retry budget into an aborted report instead of an error
///
/// Returns `Ok(None)` when the run was marked aborted.
fn abort_if_unavailable<T>(result: Result<T>, report: &mut BackupReport) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(BackupError::Unavailable { attempts, message }) => {
            tracing::error!("Remote store unavailable, backup not committed: {}", message);
            report.aborted = Some(AbortReason::Unavailable { attempts, message });
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Group entries by digest and keep the digests not already stored
///
/// Returns the pending groups and the number of files whose digest is known.
fn plan_uploads<'a>(
    manifest: &'a Manifest,
    known: &BTreeSet<Digest>,
) -> (BTreeMap<Digest, Vec<&'a ManifestEntry>>, u64) {
    let mut pending: BTreeMap<Digest, Vec<&ManifestEntry>> = BTreeMap::new();
    let mut deduplicated = 0;
    for entry in &manifest.entries {
        if known.contains(&entry.digest) {
            deduplicated += 1;
        } else {
            pending.entry(entry.digest).or_default().push(entry);
        }
    }
    (pending, deduplicated)
}

/// Read a file while re-hashing it; a changed digest means the file moved under us
fn read_verified(
    root: &Path,
    entry: &ManifestEntry,
    algorithm: crate::config::HashAlgorithm,
) -> Result<Vec<u8>> {
    let path = entry.local_path(root)?;
    let file = File::open(&path).with_path(&path)?;
    let mut reader = HashingReader::new(file, algorithm);
    let mut content = Vec::with_capacity(entry.size as usize);
    reader.read_to_end(&mut content).with_path(&path)?;

    let (digest, _) = reader.finalize();
    if digest != entry.digest {
        return Err(BackupError::ContentChanged(entry.path.clone()));
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashAlgorithm;
    use crate::core::test_support::*;
    use crate::hash::hash_bytes;
    use crate::storage::Fault;
    use std::fs;
    use tempfile::TempDir;

    fn engine(store: DatasetStore) -> BackupEngine {
        BackupEngine::new(store, BackupConfig::default())
    }

    #[test]
    fn test_knowledge_scenario_uploads_one_blob() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"x"), ("b.txt", b"x")]);
        let (memory, store) = memory_dataset();

        let report = engine(store.clone()).run(dir.path()).unwrap();

        assert!(report.is_success());
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.blobs_uploaded, 1);
        assert_eq!(report.files_uploaded, 1);
        assert_eq!(report.files_deduplicated, 1);
        assert_eq!(blob_count(&memory), 1);

        let manifest = store.load_manifest().unwrap().unwrap();
        let digest = hash_bytes(b"x", HashAlgorithm::Blake3);
        assert_eq!(manifest.file_count(), 2);
        assert!(manifest.entries.iter().all(|e| e.digest == digest));
        assert_eq!(report.committed_version, Some(manifest.version_id()));
    }

    #[test]
    fn test_second_backup_uploads_nothing() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]);
        let (memory, store) = memory_dataset();

        engine(store.clone()).run(dir.path()).unwrap();
        let blobs_after_first = blob_count(&memory);

        let second = engine(store.clone()).run(dir.path()).unwrap();
        assert!(second.is_success());
        assert_eq!(second.blobs_uploaded, 0);
        assert_eq!(second.bytes_transferred, 0);
        assert_eq!(second.files_deduplicated, 2);
        assert_eq!(blob_count(&memory), blobs_after_first);
    }

    #[test]
    fn test_unavailable_store_aborts_without_commit() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"one"), ("b.txt", b"two")]);
        let (memory, store) = retrying_memory_dataset(3);
        memory.fail_puts_with_prefix("knowledge/blobs/", Fault::Transient);

        let report = engine(store.clone()).run(dir.path()).unwrap();

        assert!(matches!(
            report.aborted,
            Some(AbortReason::Unavailable { attempts: 3, .. })
        ));
        assert_eq!(report.exit_code(), 2);
        assert!(report.committed_version.is_none());
        assert!(store.load_manifest().unwrap().is_none());
    }

    #[test]
    fn test_failed_blob_blocks_commit_but_others_upload() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("good.txt", b"good"), ("bad.txt", b"bad")]);
        let (memory, store) = memory_dataset();
        let bad = hash_bytes(b"bad", HashAlgorithm::Blake3);
        let bad_key = store.layout().blob_key(&bad, Compression::None);
        memory.fail_puts_with_prefix(bad_key.as_str(), Fault::Fatal);

        let report = engine(store.clone()).run(dir.path()).unwrap();

        assert_eq!(report.files_failed, 1);
        assert_eq!(report.failures[0].path, "bad.txt");
        assert_eq!(report.blobs_uploaded, 1);
        assert_eq!(report.exit_code(), 1);
        assert!(report.committed_version.is_none());
        assert!(store.load_manifest().unwrap().is_none());
        assert_eq!(blob_count(&memory), 1);
    }

    #[test]
    fn test_failed_run_keeps_previous_manifest() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"v1")]);
        let (memory, store) = memory_dataset();
        let first = engine(store.clone()).run(dir.path()).unwrap();

        write_tree(dir.path(), &[("a.txt", b"v2")]);
        memory.fail_puts_with_prefix("knowledge/blobs/", Fault::Fatal);
        let second = engine(store.clone()).run(dir.path()).unwrap();
        assert!(!second.is_success());

        let current = store.load_manifest().unwrap().unwrap();
        assert_eq!(Some(current.version_id()), first.committed_version);
        assert_eq!(current.entries[0].digest, hash_bytes(b"v1", HashAlgorithm::Blake3));
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"one"), ("b.txt", b"one"), ("c.txt", b"three")]);
        let (memory, store) = memory_dataset();
        let config = BackupConfig {
            dry_run: true,
            ..Default::default()
        };

        let report = BackupEngine::new(store, config).run(dir.path()).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.blobs_uploaded, 2);
        assert_eq!(report.files_deduplicated, 1);
        assert_eq!(report.exit_code(), 0);
        assert!(report.committed_version.is_none());
        assert!(memory.is_empty());
    }

    #[test]
    fn test_cancelled_run_never_commits() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"one")]);
        let (memory, store) = memory_dataset();

        let engine = engine(store);
        engine.cancel();
        let report = engine.run(dir.path()).unwrap();

        assert_eq!(report.aborted, Some(AbortReason::Cancelled));
        assert!(report.committed_version.is_none());
        assert!(memory.is_empty());
    }

    #[test]
    fn test_verify_is_advisory_by_default() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"x"), ("b.txt", b"x")]);
        let (_memory, store) = memory_dataset();
        engine(store.clone()).run(dir.path()).unwrap();

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        let config = BackupConfig {
            verify: true,
            ..Default::default()
        };
        let report = BackupEngine::new(store.clone(), config).run(dir.path()).unwrap();

        let drift = report.drift.as_ref().unwrap();
        assert_eq!(drift.removed, vec!["a.txt".to_string()]);
        assert!(report.committed_version.is_some());
        assert_eq!(store.load_manifest().unwrap().unwrap().file_count(), 1);
    }

    #[test]
    fn test_block_on_removals_stops_before_upload() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"x"), ("b.txt", b"y")]);
        let (memory, store) = memory_dataset();
        engine(store.clone()).run(dir.path()).unwrap();
        let puts_before = memory.put_count();

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        write_tree(dir.path(), &[("c.txt", b"new")]);
        let config = BackupConfig {
            verify: true,
            verify_policy: VerifyPolicy::BlockOnRemovals,
            ..Default::default()
        };
        let report = BackupEngine::new(store.clone(), config).run(dir.path()).unwrap();

        assert_eq!(report.aborted, Some(AbortReason::RemovalsBlocked { removed: 1 }));
        assert_eq!(report.exit_code(), 1);
        assert_eq!(memory.put_count(), puts_before);
        assert_eq!(store.load_manifest().unwrap().unwrap().file_count(), 2);
    }

    #[test]
    fn test_zstd_blobs_are_keyed_separately() {
        let dir = TempDir::new().unwrap();
        let content = vec![b'z'; 32 * 1024];
        write_tree(dir.path(), &[("big.txt", &content)]);
        let (memory, store) = memory_dataset();
        engine(store.clone()).run(dir.path()).unwrap();

        let config = BackupConfig {
            compression: Compression::Zstd,
            ..Default::default()
        };
        let report = BackupEngine::new(store.clone(), config).run(dir.path()).unwrap();

        assert_eq!(report.blobs_uploaded, 1);
        assert!(report.bytes_transferred < content.len() as u64);
        assert_eq!(blob_count(&memory), 2);
        let manifest = store.load_manifest().unwrap().unwrap();
        assert_eq!(manifest.compression, Compression::Zstd);
        assert!(store.has_blob(&manifest.entries[0].digest, Compression::Zstd).unwrap());
    }

    #[test]
    fn test_verify_rescans_with_remote_algorithm() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        let (_memory, store) = memory_dataset();
        let sha = BackupConfig {
            algorithm: HashAlgorithm::Sha256,
            ..Default::default()
        };
        BackupEngine::new(store.clone(), sha).run(dir.path()).unwrap();

        let config = BackupConfig {
            verify: true,
            ..Default::default()
        };
        let report = BackupEngine::new(store.clone(), config).run(dir.path()).unwrap();

        let drift = report.drift.as_ref().unwrap();
        assert!(drift.modified.is_empty());
        assert_eq!(drift.unchanged, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert!(report.is_success());
        let manifest = store.load_manifest().unwrap().unwrap();
        assert_eq!(manifest.algorithm, HashAlgorithm::Blake3);
    }

    #[test]
    fn test_unreachable_store_still_reports() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"one")]);
        let (memory, store) = retrying_memory_dataset(2);
        memory.set_offline(true);

        let report = engine(store.clone()).run(dir.path()).unwrap();

        assert!(matches!(
            report.aborted,
            Some(AbortReason::Unavailable { attempts: 2, .. })
        ));
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.files_scanned, 1);
        assert!(report.committed_version.is_none());
        memory.set_offline(false);
        assert!(store.load_manifest().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_name_blocks_commit() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"fine")]);
        fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.txt")), b"lost").unwrap();
        let (_memory, store) = memory_dataset();

        let report = engine(store.clone()).run(dir.path()).unwrap();

        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.failures[0].path, "bad\u{FFFD}.txt");
        assert_eq!(report.exit_code(), 1);
        assert!(report.committed_version.is_none());
        assert!(store.load_manifest().unwrap().is_none());
    }

    #[test]
    fn test_file_rewritten_after_scan_fails_upload() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("a.txt", b"scanned")]);
        let (memory, store) = memory_dataset();
        let scan = ManifestBuilder::new(ScanConfig::default())
            .unwrap()
            .build(dir.path(), "knowledge")
            .unwrap();
        let entry = &scan.manifest.entries[0];
        write_tree(dir.path(), &[("a.txt", b"rewritten")]);

        let err = read_verified(dir.path(), entry, HashAlgorithm::Blake3).unwrap_err();
        assert!(matches!(err, BackupError::ContentChanged(ref path) if path == "a.txt"));

        let codec = BlobCodec::new(Compression::None, 3);
        let halt = AtomicBool::new(false);
        let unavailable = Mutex::new(None);
        let outcome = engine(store).upload_blob(dir.path(), &entry.digest, &[entry], &codec, &halt, &unavailable);

        match outcome {
            BlobOutcome::Failed(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].path, "a.txt");
            }
            _ => panic!("expected a failed upload"),
        }
        assert_eq!(blob_count(&memory), 0);
    }

    #[test]
    fn test_keep_prunes_after_commit() {
        let dir = TempDir::new().unwrap();
        let (_memory, store) = memory_dataset();
        let config = BackupConfig {
            keep: Some(1),
            ..Default::default()
        };

        let mut last = None;
        for content in [&b"one"[..], b"two", b"three"] {
            write_tree(dir.path(), &[("data.bin", content)]);
            let report = BackupEngine::new(store.clone(), config.clone()).run(dir.path()).unwrap();
            assert_eq!(report.exit_code(), 0);
            last = Some(report);
            std::thread::sleep(Duration::from_millis(5));
        }

        let last = last.unwrap();
        let pruned = last.pruned.unwrap();
        assert_eq!(pruned.versions_deleted.len(), 1);
        assert_eq!(pruned.blobs_deleted, 1);
        assert_eq!(
            store.list_manifest_versions().unwrap(),
            vec![last.committed_version.unwrap()]
        );
        assert_eq!(store.list_all_blobs().unwrap().len(), 1);
    }

    #[test]
    fn test_keep_skipped_when_not_committed() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &[("data.bin", b"one")]);
        let (_memory, store) = memory_dataset();
        let config = BackupConfig {
            keep: Some(1),
            dry_run: true,
            ..Default::default()
        };

        let report = BackupEngine::new(store, config).run(dir.path()).unwrap();

        assert!(report.pruned.is_none());
        assert!(report.committed_version.is_none());
    }
}
