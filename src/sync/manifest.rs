//! Dataset manifest
//!
//! The manifest is the authoritative listing of a dataset's files at the time
//! of a backup. Entries are kept sorted by normalized relative path so that
//! diffs and serialization are deterministic.

use crate::config::{Compression, HashAlgorithm};
use crate::error::{BackupError, Result};
use crate::hash::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// A single file in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative path from root, `/`-separated
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Content digest
    pub digest: Digest,
    /// Modification time (Unix seconds)
    pub mtime: i64,
    /// Sub-second part of the modification time
    #[serde(default)]
    pub mtime_nanos: u32,
}

impl ManifestEntry {
    /// Resolve the entry below `root`, rejecting paths that would escape it
    pub fn local_path(&self, root: &Path) -> Result<PathBuf> {
        if self.path.is_empty() || self.path.contains('\\') {
            return Err(BackupError::InvalidPath(self.path.clone()));
        }

        let relative = Path::new(&self.path);
        let mut resolved = root.to_path_buf();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                _ => return Err(BackupError::InvalidPath(self.path.clone())),
            }
        }
        Ok(resolved)
    }
}

/// Snapshot of a dataset's files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version
    pub format_version: u32,
    /// Dataset identifier
    pub dataset: String,
    /// Creation timestamp
    pub created: DateTime<Utc>,
    /// Digest algorithm used for every entry
    pub algorithm: HashAlgorithm,
    /// Blob body encoding
    #[serde(default)]
    pub compression: Compression,
    /// Host that produced the backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// File entries, sorted by path
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Current manifest format version
    pub const FORMAT_VERSION: u32 = 1;

    /// Create an empty manifest
    pub fn new(dataset: &str, algorithm: HashAlgorithm) -> Self {
        Self {
            format_version: Self::FORMAT_VERSION,
            dataset: dataset.to_string(),
            created: Utc::now(),
            algorithm,
            compression: Compression::None,
            host: hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().into_owned()),
            entries: Vec::new(),
        }
    }

    /// Create a manifest from entries in any order
    pub fn with_entries(
        dataset: &str,
        algorithm: HashAlgorithm,
        mut entries: Vec<ManifestEntry>,
    ) -> Result<Self> {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let mut manifest = Self::new(dataset, algorithm);
        manifest.entries = entries;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check format version, ordering and path uniqueness
    pub fn validate(&self) -> Result<()> {
        if self.format_version > Self::FORMAT_VERSION {
            return Err(BackupError::Manifest(format!(
                "unsupported manifest format version {} (newest supported is {})",
                self.format_version,
                Self::FORMAT_VERSION
            )));
        }

        for pair in self.entries.windows(2) {
            if pair[0].path >= pair[1].path {
                return Err(BackupError::Manifest(format!(
                    "entries not strictly sorted at '{}' / '{}'",
                    pair[0].path, pair[1].path
                )));
            }
        }
        Ok(())
    }

    /// Find entry by path
    pub fn find(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Check if manifest contains a path
    pub fn contains(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// Distinct digests referenced by this manifest
    pub fn digests(&self) -> BTreeSet<Digest> {
        self.entries.iter().map(|e| e.digest).collect()
    }

    /// Total file count
    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Total logical size
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Version id derived from the creation time
    pub fn version_id(&self) -> String {
        self.created.format("%Y%m%dT%H%M%S%.3fZ").to_string()
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and validate JSON
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(data)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Normalize a relative path to the manifest form (`a/b/c`)
pub fn normalize_relative_path(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn entry(path: &str, content: &[u8]) -> ManifestEntry {
        ManifestEntry {
            path: path.to_string(),
            size: content.len() as u64,
            digest: hash_bytes(content, HashAlgorithm::Blake3),
            mtime: 1_700_000_000,
            mtime_nanos: 0,
        }
    }

    #[test]
    fn test_entries_sorted_on_construction() {
        let manifest = Manifest::with_entries(
            "knowledge",
            HashAlgorithm::Blake3,
            vec![entry("b.txt", b"x"), entry("a.txt", b"x"), entry("dir/c", b"y")],
        )
        .unwrap();

        let paths: Vec<_> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "dir/c"]);
        assert_eq!(manifest.digests().len(), 2);
        assert!(manifest.contains("dir/c"));
        assert!(!manifest.contains("dir"));
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let result = Manifest::with_entries(
            "knowledge",
            HashAlgorithm::Blake3,
            vec![entry("a.txt", b"x"), entry("a.txt", b"y")],
        );
        assert!(matches!(result, Err(BackupError::Manifest(_))));
    }

    #[test]
    fn test_json_round_trip_and_version_check() {
        let manifest =
            Manifest::with_entries("knowledge", HashAlgorithm::Sha256, vec![entry("a.txt", b"x")])
                .unwrap();
        let json = manifest.to_json().unwrap();
        let loaded = Manifest::from_json(&json).unwrap();
        assert_eq!(loaded, manifest);

        let mut future = manifest.clone();
        future.format_version = Manifest::FORMAT_VERSION + 1;
        let json = serde_json::to_vec(&future).unwrap();
        assert!(Manifest::from_json(&json).is_err());
    }

    #[test]
    fn test_local_path_rejects_escapes() {
        let root = Path::new("/restore");
        assert_eq!(
            entry("dir/a.txt", b"x").local_path(root).unwrap(),
            PathBuf::from("/restore/dir/a.txt")
        );
        assert!(entry("../etc/passwd", b"x").local_path(root).is_err());
        assert!(entry("/etc/passwd", b"x").local_path(root).is_err());
        assert!(entry("a/../../b", b"x").local_path(root).is_err());
    }

    #[test]
    fn test_normalize_relative_path() {
        assert_eq!(
            normalize_relative_path(Path::new("a/./b/c.txt")),
            Some("a/b/c.txt".to_string())
        );
        assert_eq!(normalize_relative_path(Path::new("../x")), None);
        assert_eq!(normalize_relative_path(Path::new("")), None);
    }

    #[test]
    fn test_version_id_sorts_chronologically() {
        let mut older = Manifest::new("knowledge", HashAlgorithm::Blake3);
        let mut newer = older.clone();
        older.created = "2024-01-02T03:04:05.006Z".parse().unwrap();
        newer.created = "2024-11-02T03:04:05.006Z".parse().unwrap();
        assert_eq!(older.version_id(), "20240102T030405.006Z");
        assert!(older.version_id() < newer.version_id());
    }
}
