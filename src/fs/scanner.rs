//! Directory scanner that builds manifests
//!
//! Walks a tree without following links, hashes regular files on a rayon
//! pool and returns a sorted manifest. Per-file problems never abort the
//! walk; they are reported as skipped paths with a reason.

use crate::config::{effective_threads, HashAlgorithm};
use crate::error::{BackupError, Result};
use crate::fs::is_temp_file;
use crate::hash::{hash_reader, Digest};
use crate::sync::{normalize_relative_path, Manifest, ManifestEntry};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use walkdir::{DirEntry, WalkDir};

/// Why a path was left out of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Symbolic link (never followed)
    Symlink,
    /// FIFO, socket, device node
    SpecialFile,
    /// Disappeared between listing and hashing
    Vanished,
    /// Could not be read
    Unreadable(String),
    /// Path is not valid UTF-8
    NonUtf8Path,
    /// Temporary file left by an interrupted restore
    PartialRestore,
}

impl SkipReason {
    /// Whether this skip means the file's content could not be captured
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Unreadable(_) | Self::NonUtf8Path)
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symlink => write!(f, "symbolic link"),
            Self::SpecialFile => write!(f, "special file"),
            Self::Vanished => write!(f, "vanished during scan"),
            Self::Unreadable(msg) => write!(f, "unreadable: {}", msg),
            Self::NonUtf8Path => write!(f, "path is not valid UTF-8"),
            Self::PartialRestore => write!(f, "leftover of an interrupted restore"),
        }
    }
}

/// A path that was not included in the manifest
#[derive(Debug, Clone, Serialize)]
pub struct SkippedPath {
    /// Path relative to the root (lossy for non-UTF-8 names)
    pub path: String,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// Configuration for directory scanning
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Number of threads for hashing (0 = auto-detect)
    pub threads: usize,
    /// Digest algorithm
    pub algorithm: HashAlgorithm,
    /// Include hidden files
    pub include_hidden: bool,
    /// Exclude patterns, matched against the relative path and the file name
    pub exclude_patterns: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            algorithm: HashAlgorithm::Blake3,
            include_hidden: true,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Result of building a manifest
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// The manifest, sorted by path
    pub manifest: Manifest,
    /// Paths left out, sorted by path
    pub skipped: Vec<SkippedPath>,
    /// Scan duration
    pub duration: Duration,
}

impl ScanOutcome {
    /// Skipped paths that count as failures
    pub fn failed_skips(&self) -> impl Iterator<Item = &SkippedPath> {
        self.skipped.iter().filter(|s| s.reason.is_failure())
    }

    /// Total bytes hashed
    pub fn total_size(&self) -> u64 {
        self.manifest.total_size()
    }
}

/// Regular file found by the walk, not yet hashed
struct Candidate {
    path: PathBuf,
    relative: String,
}

/// Walks a tree and produces a manifest
pub struct ManifestBuilder {
    config: ScanConfig,
    exclude_matcher: GlobSet,
}

impl ManifestBuilder {
    /// Create a new builder with the given configuration
    pub fn new(config: ScanConfig) -> Result<Self> {
        let exclude_matcher = Self::build_globset(&config.exclude_patterns)?;
        Ok(Self {
            config,
            exclude_matcher,
        })
    }

    /// Build a GlobSet from patterns
    fn build_globset(patterns: &[String]) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                BackupError::config(format!("Invalid glob pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| BackupError::config(format!("Failed to build glob set: {}", e)))
    }

    /// Digest algorithm used by this builder
    pub fn algorithm(&self) -> HashAlgorithm {
        self.config.algorithm
    }

    /// Walk `root` and build the manifest for `dataset`
    pub fn build(&self, root: &Path, dataset: &str) -> Result<ScanOutcome> {
        let start_time = Instant::now();

        let metadata = std::fs::metadata(root).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BackupError::NotFound(root.to_path_buf())
            } else {
                BackupError::io(root, e)
            }
        })?;
        if !metadata.is_dir() {
            return Err(BackupError::io(
                root,
                io::Error::new(io::ErrorKind::InvalidInput, "backup root is not a directory"),
            ));
        }
        // Surface an unreadable root as a run-level error rather than a skip
        std::fs::read_dir(root).map_err(|e| BackupError::io(root, e))?;

        let (candidates, mut skipped) = self.walk(root);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(effective_threads(self.config.threads))
            .build()
            .map_err(|e| BackupError::config(format!("Thread pool error: {}", e)))?;

        let algorithm = self.config.algorithm;
        let hashed: Vec<std::result::Result<ManifestEntry, SkippedPath>> = pool.install(|| {
            candidates
                .into_par_iter()
                .map(|c| hash_candidate(&c, algorithm))
                .collect()
        });

        let mut entries = Vec::with_capacity(hashed.len());
        for result in hashed {
            match result {
                Ok(entry) => entries.push(entry),
                Err(skip) => skipped.push(skip),
            }
        }

        skipped.sort_by(|a, b| a.path.cmp(&b.path));
        for skip in &skipped {
            if skip.reason.is_failure() {
                tracing::warn!("Skipping {}: {}", skip.path, skip.reason);
            } else {
                tracing::debug!("Skipping {}: {}", skip.path, skip.reason);
            }
        }

        let manifest = Manifest::with_entries(dataset, algorithm, entries)?;
        tracing::info!(
            files = manifest.file_count(),
            skipped = skipped.len(),
            "Scanned {}",
            root.display()
        );

        Ok(ScanOutcome {
            manifest,
            skipped,
            duration: start_time.elapsed(),
        })
    }

    /// List regular files and classify everything else
    fn walk(&self, root: &Path) -> (Vec<Candidate>, Vec<SkippedPath>) {
        let mut candidates = Vec::new();
        let mut skipped = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| self.config.include_hidden || !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| lossy_relative(p, root))
                        .unwrap_or_default();
                    let vanished = err
                        .io_error()
                        .map(|e| e.kind() == io::ErrorKind::NotFound)
                        .unwrap_or(false);
                    let reason = if vanished {
                        SkipReason::Vanished
                    } else {
                        SkipReason::Unreadable(err.to_string())
                    };
                    skipped.push(SkippedPath { path, reason });
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }

            let relative_path = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let relative = match normalize_relative_path(relative_path) {
                Some(r) => r,
                None => {
                    skipped.push(SkippedPath {
                        path: lossy_relative(entry.path(), root),
                        reason: SkipReason::NonUtf8Path,
                    });
                    continue;
                }
            };

            if self.is_excluded(&relative, &entry) {
                continue;
            }
            if file_type.is_file() && entry.file_name().to_str().map(is_temp_file).unwrap_or(false) {
                skipped.push(SkippedPath {
                    path: relative,
                    reason: SkipReason::PartialRestore,
                });
                continue;
            }

            if file_type.is_symlink() {
                skipped.push(SkippedPath {
                    path: relative,
                    reason: SkipReason::Symlink,
                });
            } else if file_type.is_file() {
                candidates.push(Candidate {
                    path: entry.into_path(),
                    relative,
                });
            } else {
                skipped.push(SkippedPath {
                    path: relative,
                    reason: SkipReason::SpecialFile,
                });
            }
        }

        (candidates, skipped)
    }

    fn is_excluded(&self, relative: &str, entry: &DirEntry) -> bool {
        if self.exclude_matcher.is_empty() {
            return false;
        }
        self.exclude_matcher.is_match(relative)
            || entry
                .file_name()
                .to_str()
                .map(|name| self.exclude_matcher.is_match(name))
                .unwrap_or(false)
    }
}

/// Hash one file, turning per-file errors into skips
fn hash_candidate(
    candidate: &Candidate,
    algorithm: HashAlgorithm,
) -> std::result::Result<ManifestEntry, SkippedPath> {
    let skip = |reason| SkippedPath {
        path: candidate.relative.clone(),
        reason,
    };
    let classify = |e: io::Error| {
        if e.kind() == io::ErrorKind::NotFound {
            skip(SkipReason::Vanished)
        } else {
            skip(SkipReason::Unreadable(e.to_string()))
        }
    };

    let file = File::open(&candidate.path).map_err(classify)?;
    let metadata = file.metadata().map_err(classify)?;
    let (digest, size): (Digest, u64) = hash_reader(file, algorithm).map_err(classify)?;

    let (mtime, mtime_nanos) = split_mtime(metadata.modified().unwrap_or(UNIX_EPOCH));

    Ok(ManifestEntry {
        path: candidate.relative.clone(),
        size,
        digest,
        mtime,
        mtime_nanos,
    })
}

/// Split a timestamp into Unix seconds and nanoseconds
pub fn split_mtime(time: SystemTime) -> (i64, u32) {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => {
            // Before the epoch: floor to whole seconds
            let d = e.duration();
            let secs = -(d.as_secs() as i64);
            if d.subsec_nanos() == 0 {
                (secs, 0)
            } else {
                (secs - 1, 1_000_000_000 - d.subsec_nanos())
            }
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn lossy_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
