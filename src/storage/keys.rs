//! Object key layout
//!
//! ```text
//! [<prefix>/]<dataset>/manifest              current manifest pointer
//! [<prefix>/]<dataset>/manifests/<version>   retained manifest versions
//! [<prefix>/]<dataset>/blobs/<hex digest>    content-addressed file bodies
//! [<prefix>/]<dataset>/blobs/<hex digest>.zst zstd-encoded file bodies
//! ```

use crate::config::Compression;
use crate::error::{BackupError, Result};
use crate::hash::Digest;
use std::fmt;

const ZSTD_SUFFIX: &str = ".zst";

/// Key of an object in the remote namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Wrap a raw key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check a dataset identifier: `[A-Za-z0-9._-]+`, not `.` or `..`
pub fn validate_dataset_id(dataset: &str) -> Result<()> {
    let valid_chars = dataset
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if dataset.is_empty() || !valid_chars || dataset == "." || dataset == ".." {
        return Err(BackupError::config(format!(
            "Invalid dataset id '{}': use letters, digits, '.', '_' or '-'",
            dataset
        )));
    }
    Ok(())
}

/// Key derivation for one dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    base: String,
    dataset: String,
}

impl KeyLayout {
    /// Layout for `dataset` below an optional prefix
    pub fn new(prefix: Option<&str>, dataset: &str) -> Result<Self> {
        validate_dataset_id(dataset)?;
        let prefix = prefix.map(|p| p.trim_matches('/')).unwrap_or("");
        if prefix.split('/').any(|seg| seg == "..") {
            return Err(BackupError::config(format!("Invalid key prefix '{}'", prefix)));
        }
        let base = if prefix.is_empty() {
            dataset.to_string()
        } else {
            format!("{}/{}", prefix, dataset)
        };
        Ok(Self {
            base,
            dataset: dataset.to_string(),
        })
    }

    /// Dataset identifier
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Current manifest pointer
    pub fn manifest_key(&self) -> ObjectKey {
        ObjectKey(format!("{}/manifest", self.base))
    }

    /// Prefix under which retained versions live
    pub fn versions_prefix(&self) -> String {
        format!("{}/manifests/", self.base)
    }

    /// Retained manifest version
    pub fn version_key(&self, version: &str) -> ObjectKey {
        ObjectKey(format!("{}{}", self.versions_prefix(), version))
    }

    /// Prefix under which blobs live
    pub fn blobs_prefix(&self) -> String {
        format!("{}/blobs/", self.base)
    }

    /// Content-addressed blob key for a given body encoding
    pub fn blob_key(&self, digest: &Digest, compression: Compression) -> ObjectKey {
        let suffix = match compression {
            Compression::None => "",
            Compression::Zstd => ZSTD_SUFFIX,
        };
        ObjectKey(format!("{}{}{}", self.blobs_prefix(), digest.to_hex(), suffix))
    }

    /// Recover digest and encoding from a blob key
    pub fn parse_blob_key(&self, key: &str) -> Option<(Digest, Compression)> {
        let name = key.strip_prefix(&self.blobs_prefix())?;
        match name.strip_suffix(ZSTD_SUFFIX) {
            Some(hex) => hex.parse().ok().map(|d| (d, Compression::Zstd)),
            None => name.parse().ok().map(|d| (d, Compression::None)),
        }
    }

    /// Recover a version id from a version key
    pub fn version_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.versions_prefix().as_str())
            .filter(|v| !v.is_empty() && !v.contains('/'))
    }
}
