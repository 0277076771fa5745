//! Restore engine
//!
//! Materializes a committed manifest under a local root. Each blob is
//! downloaded once, decoded and checked against its digest before any path
//! that shares it is written. Files land through an atomic rename, so a
//! failed or interrupted restore never leaves a partially written file at a
//! manifest path.

use super::{build_pool, AbortReason, FileFailure};
use crate::config::RestoreConfig;
use crate::error::{BackupError, IoResultExt, Result};
use crate::fs::{set_mtime, write_file_atomic};
use crate::hash::{hash_bytes, hash_file, Digest};
use crate::progress::ProgressReporter;
use crate::storage::{BlobCodec, DatasetStore};
use crate::sync::{normalize_relative_path, Manifest, ManifestEntry};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Restore operation result
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    /// Dataset identifier
    pub dataset: String,
    /// Restore target
    pub root: PathBuf,
    /// Version id of the restored manifest, unset when it could not be loaded
    pub version: Option<String>,
    /// Files written
    pub files_restored: u64,
    /// Files already matching the manifest
    pub files_unchanged: u64,
    /// Files that could not be restored
    pub files_failed: u64,
    /// Local entries removed by mirror mode
    pub files_deleted: u64,
    /// Empty directories removed by mirror mode
    pub dirs_removed: u64,
    /// Blob body bytes downloaded
    pub bytes_transferred: u64,
    /// File bytes written
    pub bytes_written: u64,
    /// Where a pre-existing root was moved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
    /// Whether mirror deletion was requested but skipped because of failures
    pub mirror_skipped: bool,
    /// Set when the run stopped early
    pub aborted: Option<AbortReason>,
    /// Total duration
    pub duration: Duration,
    /// Per-file failures
    pub failures: Vec<FileFailure>,
}

impl RestoreReport {
    /// Check if the restore was completely successful
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failures.is_empty()
    }

    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        match &self.aborted {
            Some(reason) => reason.exit_code(),
            None if !self.failures.is_empty() => 1,
            None => 0,
        }
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Restore Summary ===");
        println!("Dataset:         {}", self.dataset);
        println!("Version:         {}", self.version.as_deref().unwrap_or("(not loaded)"));
        println!("Root:            {}", self.root.display());
        if let Some(snapshot) = &self.snapshot {
            println!("Snapshot:        {}", snapshot.display());
        }
        println!("Restored:        {}", self.files_restored);
        println!("Unchanged:       {}", self.files_unchanged);
        println!("Failed:          {}", self.files_failed);
        if self.files_deleted > 0 || self.dirs_removed > 0 {
            println!("Deleted:         {} files, {} dirs", self.files_deleted, self.dirs_removed);
        }
        if self.mirror_skipped {
            println!("Mirror:          skipped because of failures");
        }
        println!("Transferred:     {}", humansize::format_size(self.bytes_transferred, humansize::BINARY));
        println!("Written:         {}", humansize::format_size(self.bytes_written, humansize::BINARY));
        println!("Duration:        {:.2?}", self.duration);
        if let Some(reason) = &self.aborted {
            println!("Aborted:         {}", reason);
        }

        if !self.failures.is_empty() {
            println!("\nFailures: {}", self.failures.len());
            for failure in &self.failures {
                println!("  {} - {}", failure.path, failure.error);
            }
        }
    }
}

/// Outcome of restoring every path that shares one blob
#[derive(Default)]
struct GroupOutcome {
    restored: u64,
    unchanged: u64,
    bytes_transferred: u64,
    bytes_written: u64,
    failures: Vec<FileFailure>,
}

type Target<'a> = (&'a ManifestEntry, PathBuf);

/// Main restore engine
pub struct RestoreEngine {
    store: DatasetStore,
    config: RestoreConfig,
    progress: Option<ProgressReporter>,
    cancelled: AtomicBool,
}

impl RestoreEngine {
    /// Create a new restore engine
    pub fn new(store: DatasetStore, config: RestoreConfig) -> Self {
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

    /// Restore the dataset into `root`
    pub fn run(&self, root: &Path) -> Result<RestoreReport> {
        let start_time = Instant::now();

        if let Some(progress) = &self.progress {
            progress.set_status("Loading manifest...");
        }
        let mut report = RestoreReport {
            dataset: self.store.dataset().to_string(),
            root: root.to_path_buf(),
            version: None,
            files_restored: 0,
            files_unchanged: 0,
            files_failed: 0,
            files_deleted: 0,
            dirs_removed: 0,
            bytes_transferred: 0,
            bytes_written: 0,
            snapshot: None,
            mirror_skipped: false,
            aborted: None,
            duration: Duration::ZERO,
            failures: Vec::new(),
        };

        let loaded = match &self.config.version {
            Some(version) => self.store.load_manifest_version(version),
            None => self.store.require_manifest(),
        };
        let manifest = match loaded {
            Ok(manifest) => manifest,
            Err(BackupError::Unavailable { attempts, message }) => {
                tracing::error!("Remote store unavailable, nothing restored: {}", message);
                report.aborted = Some(AbortReason::Unavailable { attempts, message });
                report.duration = start_time.elapsed();
                if let Some(progress) = &self.progress {
                    progress.finish_error("Remote store unavailable");
                }
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        report.version = Some(manifest.version_id());

        if self.config.snapshot_existing {
            report.snapshot = snapshot_root(root)?;
        }
        fs::create_dir_all(root).with_path(root)?;

        let mut groups: BTreeMap<Digest, Vec<Target<'_>>> = BTreeMap::new();
        for entry in &manifest.entries {
            match resolve_target(root, entry) {
                Ok(path) => groups.entry(entry.digest).or_default().push((entry, path)),
                Err(e) => {
                    tracing::warn!("Refusing to restore {}: {}", entry.path, e);
                    report.failures.push(FileFailure::new(entry.path.clone(), &e));
                }
            }
        }

        if let Some(progress) = &self.progress {
            progress.set_total_files(manifest.file_count() as u64);
            progress.set_total_bytes(manifest.total_size());
            progress.set_status("Restoring files...");
        }

        let codec = BlobCodec::for_reading(manifest.compression);
        let halt = AtomicBool::new(false);
        let unavailable: Mutex<Option<AbortReason>> = Mutex::new(None);

        let pool = build_pool(self.config.threads)?;
        let outcomes: Vec<GroupOutcome> = pool.install(|| {
            groups
                .par_iter()
                .map(|(digest, targets)| {
                    self.restore_group(&manifest, digest, targets, &codec, &halt, &unavailable)
                })
                .collect()
        });

        for outcome in outcomes {
            report.files_restored += outcome.restored;
            report.files_unchanged += outcome.unchanged;
            report.bytes_transferred += outcome.bytes_transferred;
            report.bytes_written += outcome.bytes_written;
            report.failures.extend(outcome.failures);
        }

        report.aborted = unavailable
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if report.aborted.is_none() && self.is_cancelled() {
            report.aborted = Some(AbortReason::Cancelled);
        }

        if self.config.mirror {
            if report.is_success() {
                let (files, dirs) = mirror_prune(root, &manifest)?;
                report.files_deleted = files;
                report.dirs_removed = dirs;
            } else {
                tracing::warn!("Skipping mirror deletion because the restore was incomplete");
                report.mirror_skipped = true;
            }
        }

        report.failures.sort_by(|a, b| a.path.cmp(&b.path));
        report.files_failed = report.failures.len() as u64;
        report.duration = start_time.elapsed();

        tracing::info!(
            restored = report.files_restored,
            unchanged = report.files_unchanged,
            failed = report.files_failed,
            "Restored {} into {}",
            manifest.version_id(),
            root.display()
        );

        if let Some(progress) = &self.progress {
            if report.is_success() {
                progress.finish_success(&format!("Restored {}", manifest.version_id()));
            } else {
                progress.finish_error(&format!("{} files failed", report.files_failed));
            }
        }

        Ok(report)
    }

    /// Restore every path sharing one digest, downloading the blob at most once
    fn restore_group(
        &self,
        manifest: &Manifest,
        digest: &Digest,
        targets: &[Target<'_>],
        codec: &BlobCodec,
        halt: &AtomicBool,
        unavailable: &Mutex<Option<AbortReason>>,
    ) -> GroupOutcome {
        let mut outcome = GroupOutcome::default();
        if halt.load(Ordering::SeqCst) || self.is_cancelled() {
            return outcome;
        }

        let mut needed = Vec::new();
        for (entry, path) in targets {
            if matches_local(path, entry, manifest) {
                outcome.unchanged += 1;
                if let Err(e) = set_mtime(path, entry.mtime, entry.mtime_nanos) {
                    tracing::debug!("Could not reset mtime of {}: {}", entry.path, e);
                }
                self.tick(entry.size);
            } else {
                needed.push((*entry, path));
            }
        }
        if needed.is_empty() {
            return outcome;
        }

        let content = match self.fetch_blob(manifest, digest, codec, &needed[0].0.path) {
            Ok((content, transferred)) => {
                outcome.bytes_transferred = transferred;
                content
            }
            Err(BackupError::Unavailable { attempts, message }) => {
                halt.store(true, Ordering::SeqCst);
                let mut slot = unavailable
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                slot.get_or_insert(AbortReason::Unavailable { attempts, message });
                return outcome;
            }
            Err(e) => {
                tracing::error!("Blob {} unusable: {}", digest.short(), e);
                outcome.failures.extend(
                    needed
                        .iter()
                        .map(|(entry, _)| FileFailure::new(entry.path.clone(), &e)),
                );
                return outcome;
            }
        };

        for (entry, path) in needed {
            if let Some(progress) = &self.progress {
                progress.set_current_file(&entry.path);
            }
            match write_file_atomic(path, &content, entry.mtime, entry.mtime_nanos) {
                Ok(()) => {
                    outcome.restored += 1;
                    outcome.bytes_written += content.len() as u64;
                }
                Err(e) => {
                    tracing::warn!("Failed to write {}: {}", entry.path, e);
                    outcome.failures.push(FileFailure::new(entry.path.clone(), &e));
                }
            }
            self.tick(entry.size);
        }
        outcome
    }

    /// Download, decode and verify one blob
    fn fetch_blob(
        &self,
        manifest: &Manifest,
        digest: &Digest,
        codec: &BlobCodec,
        first_path: &str,
    ) -> Result<(Vec<u8>, u64)> {
        let body = self.store.get_blob(digest, manifest.compression)?;
        let transferred = body.len() as u64;
        let content = codec.decode(body).map_err(|e| {
            BackupError::integrity(first_path, digest.to_hex(), format!("undecodable blob ({})", e))
        })?;

        let actual = hash_bytes(&content, manifest.algorithm);
        if actual != *digest {
            return Err(BackupError::integrity(first_path, digest.to_hex(), actual.to_hex()));
        }
        Ok((content, transferred))
    }

    fn tick(&self, bytes: u64) {
        if let Some(progress) = &self.progress {
            progress.increment_files(1);
            progress.increment_bytes(bytes);
        }
    }
}

/// Resolve a manifest path below `root`, refusing escapes and symlinked ancestors
fn resolve_target(root: &Path, entry: &ManifestEntry) -> Result<PathBuf> {
    let target = entry.local_path(root)?;
    let mut current = root.to_path_buf();
    let relative = target
        .strip_prefix(root)
        .map_err(|_| BackupError::InvalidPath(entry.path.clone()))?;
    let depth = relative.components().count();

    for component in relative.components().take(depth.saturating_sub(1)) {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(BackupError::InvalidPath(format!(
                    "{} (ancestor {} is a symbolic link)",
                    entry.path,
                    current.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(BackupError::io(&current, e)),
        }
    }
    Ok(target)
}

/// Whether the local file already has the recorded size and digest
fn matches_local(path: &Path, entry: &ManifestEntry, manifest: &Manifest) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() == entry.size => hash_file(path, manifest.algorithm)
            .map(|result| result.digest == entry.digest)
            .unwrap_or(false),
        _ => false,
    }
}

/// Move an existing root aside as `<root>_snapshot_<YYYY-MM-DD-HH-MM-SS>`
fn snapshot_root(root: &Path) -> Result<Option<PathBuf>> {
    match fs::symlink_metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(BackupError::io(
                root,
                io::Error::new(io::ErrorKind::InvalidInput, "restore root is not a directory"),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BackupError::io(root, e)),
    }

    let name = root
        .file_name()
        .ok_or_else(|| BackupError::config(format!("Cannot snapshot {}", root.display())))?;
    let stamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
    let snapshot = root.with_file_name(format!("{}_snapshot_{}", name.to_string_lossy(), stamp));
    if fs::symlink_metadata(&snapshot).is_ok() {
        return Err(BackupError::io(
            &snapshot,
            io::Error::new(io::ErrorKind::AlreadyExists, "snapshot target already exists"),
        ));
    }

    fs::rename(root, &snapshot).with_path(root)?;
    tracing::info!("Moved existing {} to {}", root.display(), snapshot.display());
    Ok(Some(snapshot))
}

/// Delete local files and links absent from the manifest, then empty directories
fn mirror_prune(root: &Path, manifest: &Manifest) -> Result<(u64, u64)> {
    let keep: HashSet<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
    let mut files_deleted = 0;
    let mut dirs_removed = 0;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .contents_first(true);

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            BackupError::io(path, io::Error::new(io::ErrorKind::Other, e.to_string()))
        })?;
        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let is_empty = fs::read_dir(path).with_path(path)?.next().is_none();
            if is_empty {
                fs::remove_dir(path).with_path(path)?;
                dirs_removed += 1;
                tracing::debug!("Removed empty directory {}", path.display());
            }
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .ok()
            .and_then(normalize_relative_path);
        let listed = relative
            .as_deref()
            .map(|rel| keep.contains(rel) && file_type.is_file())
            .unwrap_or(false);
        if !listed {
            fs::remove_file(path).with_path(path)?;
            files_deleted += 1;
            tracing::debug!("Deleted {} (not in manifest)", path.display());
        }
    }

    if files_deleted > 0 || dirs_removed > 0 {
        tracing::info!(
            "Mirror removed {} files and {} directories from {}",
            files_deleted,
            dirs_removed,
            root.display()
        );
    }
    Ok((files_deleted, dirs_removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupConfig, Compression, HashAlgorithm};
    use crate::core::test_support::*;
    use crate::core::BackupEngine;
    use tempfile::TempDir;

    fn backup(store: &DatasetStore, root: &Path) {
        let report = BackupEngine::new(store.clone(), BackupConfig::default())
            .run(root)
            .unwrap();
        assert!(report.committed_version.is_some());
    }

    fn restore(store: &DatasetStore, root: &Path, config: RestoreConfig) -> RestoreReport {
        RestoreEngine::new(store.clone(), config).run(root).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_content_and_mtime() {
        let source = TempDir::new().unwrap();
        write_tree(
            source.path(),
            &[("a.txt", b"alpha"), ("nested/deep/b.bin", &[0u8, 1, 2, 255]), ("empty", b"")],
        );
        filetime::set_file_mtime(
            source.path().join("a.txt"),
            filetime::FileTime::from_unix_time(1_500_000_000, 250_000_000),
        )
        .unwrap();
        let (_memory, store) = memory_dataset();
        backup(&store, source.path());

        let target = TempDir::new().unwrap();
        let report = restore(&store, target.path(), RestoreConfig::default());

        assert!(report.is_success());
        assert_eq!(report.files_restored, 3);
        assert_eq!(fs::read(target.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(target.path().join("nested/deep/b.bin")).unwrap(), [0u8, 1, 2, 255]);
        assert_eq!(fs::read(target.path().join("empty")).unwrap(), b"");

        let meta = fs::metadata(target.path().join("a.txt")).unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), 1_500_000_000);
    }

    #[test]
    fn test_knowledge_scenario_restores_shared_blob() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("a.txt", b"x"), ("b.txt", b"x")]);
        let (_memory, store) = memory_dataset();
        backup(&store, source.path());

        let target = TempDir::new().unwrap();
        let fresh = target.path().join("fresh");
        let report = restore(&store, &fresh, RestoreConfig::default());

        assert_eq!(report.files_restored, 2);
        assert_eq!(report.bytes_transferred, 1);
        assert_eq!(fs::read(fresh.join("a.txt")).unwrap(), b"x");
        assert_eq!(fs::read(fresh.join("b.txt")).unwrap(), b"x");
    }

    #[test]
    fn test_corrupted_blob_fails_only_its_files() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("a.txt", b"first"), ("b.txt", b"second")]);
        let (memory, store) = memory_dataset();
        backup(&store, source.path());

        let digest = crate::hash::hash_bytes(b"first", HashAlgorithm::Blake3);
        let key = store.layout().blob_key(&digest, Compression::None);
        memory.corrupt(key.as_str(), b"tampered");

        let target = TempDir::new().unwrap();
        let report = restore(&store, target.path(), RestoreConfig::default());

        assert_eq!(report.files_failed, 1);
        assert_eq!(report.failures[0].path, "a.txt");
        assert!(report.failures[0].error.contains("Integrity check failed"));
        assert_eq!(report.exit_code(), 1);
        assert!(!target.path().join("a.txt").exists());
        assert_eq!(fs::read(target.path().join("b.txt")).unwrap(), b"second");
    }

    #[test]
    fn test_second_restore_leaves_matching_files() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("a.txt", b"one"), ("b.txt", b"two")]);
        let (memory, store) = memory_dataset();
        backup(&store, source.path());

        let target = TempDir::new().unwrap();
        restore(&store, target.path(), RestoreConfig::default());
        fs::write(target.path().join("b.txt"), b"changed").unwrap();

        let ops_before = memory.operation_count();
        let report = restore(&store, target.path(), RestoreConfig::default());

        assert_eq!(report.files_unchanged, 1);
        assert_eq!(report.files_restored, 1);
        assert_eq!(fs::read(target.path().join("b.txt")).unwrap(), b"two");
        // One manifest fetch plus one blob fetch
        assert_eq!(memory.operation_count() - ops_before, 2);
    }

    #[test]
    fn test_overlay_keeps_extra_files() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("a.txt", b"one")]);
        let (_memory, store) = memory_dataset();
        backup(&store, source.path());

        let target = TempDir::new().unwrap();
        write_tree(target.path(), &[("extra.txt", b"mine")]);
        restore(&store, target.path(), RestoreConfig::default());

        assert!(target.path().join("extra.txt").exists());
        assert!(target.path().join("a.txt").exists());
    }

    #[test]
    fn test_mirror_deletes_extras_and_empty_dirs() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("keep/a.txt", b"one")]);
        let (_memory, store) = memory_dataset();
        backup(&store, source.path());

        let target = TempDir::new().unwrap();
        write_tree(
            target.path(),
            &[("extra.txt", b"x"), ("keep/other.txt", b"y"), ("gone/deep/z.txt", b"z")],
        );
        let config = RestoreConfig {
            mirror: true,
            ..Default::default()
        };
        let report = restore(&store, target.path(), config);

        assert_eq!(report.files_deleted, 3);
        assert_eq!(report.dirs_removed, 2);
        assert!(target.path().join("keep/a.txt").exists());
        assert!(!target.path().join("extra.txt").exists());
        assert!(!target.path().join("gone").exists());
    }

    #[test]
    fn test_mirror_skipped_after_failure() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("a.txt", b"one")]);
        let (memory, store) = memory_dataset();
        backup(&store, source.path());
        let digest = crate::hash::hash_bytes(b"one", HashAlgorithm::Blake3);
        memory.corrupt(store.layout().blob_key(&digest, Compression::None).as_str(), b"bad");

        let target = TempDir::new().unwrap();
        write_tree(target.path(), &[("extra.txt", b"x")]);
        let config = RestoreConfig {
            mirror: true,
            ..Default::default()
        };
        let report = restore(&store, target.path(), config);

        assert!(report.mirror_skipped);
        assert!(target.path().join("extra.txt").exists());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let (_memory, store) = memory_dataset();
        let digest = crate::hash::hash_bytes(b"evil", HashAlgorithm::Blake3);
        store.put_blob(&digest, Compression::None, b"evil").unwrap();
        let entries = ["../escape.txt", "/abs.txt", "ok.txt"]
            .iter()
            .map(|p| ManifestEntry {
                path: p.to_string(),
                size: 4,
                digest,
                mtime: 0,
                mtime_nanos: 0,
            })
            .collect();
        let manifest = Manifest::with_entries("knowledge", HashAlgorithm::Blake3, entries).unwrap();
        store.commit_manifest(&manifest).unwrap();

        let outer = TempDir::new().unwrap();
        let target = outer.path().join("root");
        let report = restore(&store, &target, RestoreConfig::default());

        assert_eq!(report.files_failed, 2);
        assert_eq!(report.files_restored, 1);
        assert!(!outer.path().join("escape.txt").exists());
        assert_eq!(fs::read(target.join("ok.txt")).unwrap(), b"evil");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_ancestor_rejected() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("link/file.txt", b"data")]);
        let (_memory, store) = memory_dataset();
        backup(&store, source.path());

        let target = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), target.path().join("link")).unwrap();
        let report = restore(&store, target.path(), RestoreConfig::default());

        assert_eq!(report.files_failed, 1);
        assert!(!elsewhere.path().join("file.txt").exists());
    }

    #[test]
    fn test_missing_manifest() {
        let (_memory, store) = memory_dataset();
        let target = TempDir::new().unwrap();
        let err = RestoreEngine::new(store, RestoreConfig::default())
            .run(target.path())
            .unwrap_err();
        assert!(matches!(err, BackupError::ManifestNotFound { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_restore_older_version() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("a.txt", b"v1")]);
        let (_memory, store) = memory_dataset();
        backup(&store, source.path());
        let first = store.list_manifest_versions().unwrap()[0].clone();

        std::thread::sleep(Duration::from_millis(5));
        write_tree(source.path(), &[("a.txt", b"v2")]);
        backup(&store, source.path());

        let target = TempDir::new().unwrap();
        let config = RestoreConfig {
            version: Some(first.clone()),
            ..Default::default()
        };
        let report = restore(&store, target.path(), config);

        assert_eq!(report.version, Some(first));
        assert_eq!(fs::read(target.path().join("a.txt")).unwrap(), b"v1");
    }

    #[test]
    fn test_zstd_round_trip() {
        let source = TempDir::new().unwrap();
        let content = b"compressible ".repeat(4096);
        write_tree(source.path(), &[("log.txt", &content)]);
        let (_memory, store) = memory_dataset();
        let config = BackupConfig {
            compression: Compression::Zstd,
            compression_level: 5,
            ..Default::default()
        };
        BackupEngine::new(store.clone(), config).run(source.path()).unwrap();

        let target = TempDir::new().unwrap();
        let report = restore(&store, target.path(), RestoreConfig::default());

        assert!(report.bytes_transferred < content.len() as u64);
        assert_eq!(fs::read(target.path().join("log.txt")).unwrap(), content);
    }

    #[test]
    fn test_snapshot_existing_root() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("a.txt", b"restored")]);
        let (_memory, store) = memory_dataset();
        backup(&store, source.path());

        let outer = TempDir::new().unwrap();
        let target = outer.path().join("data");
        write_tree(&target, &[("old.txt", b"previous")]);

        let config = RestoreConfig {
            snapshot_existing: true,
            ..Default::default()
        };
        let report = restore(&store, &target, config);

        let snapshot = report.snapshot.clone().unwrap();
        let name = snapshot.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("data_snapshot_"));
        assert_eq!(fs::read(snapshot.join("old.txt")).unwrap(), b"previous");
        assert!(!target.join("old.txt").exists());
        assert_eq!(fs::read(target.join("a.txt")).unwrap(), b"restored");
    }

    #[test]
    fn test_unavailable_store_aborts() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("a.txt", b"one")]);
        let (memory, store) = retrying_memory_dataset(2);
        backup(&store, source.path());

        let target = TempDir::new().unwrap();
        memory.set_offline(true);
        let report = RestoreEngine::new(store.clone(), RestoreConfig::default())
            .run(target.path())
            .unwrap();
        assert!(matches!(
            report.aborted,
            Some(AbortReason::Unavailable { attempts: 2, .. })
        ));
        assert_eq!(report.exit_code(), 2);
        assert!(report.version.is_none());
        assert!(!target.path().join("a.txt").exists());
    }

    #[test]
    fn test_cancelled_restore_writes_nothing() {
        let source = TempDir::new().unwrap();
        write_tree(source.path(), &[("a.txt", b"one"), ("b.txt", b"two")]);
        let (_memory, store) = memory_dataset();
        backup(&store, source.path());

        let target = TempDir::new().unwrap();
        let engine = RestoreEngine::new(store, RestoreConfig::default());
        engine.cancel();
        let report = engine.run(target.path()).unwrap();

        assert_eq!(report.aborted, Some(AbortReason::Cancelled));
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.files_restored, 0);
        assert!(!target.path().join("a.txt").exists());
    }
}
