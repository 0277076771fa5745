//! Per-dataset view of a remote store
//!
//! Two contracts with different guarantees live side by side:
//!
//! - the blob set: immutable, content-addressed, write-once. Storing a blob
//!   that already exists is a no-op. The body encoding is part of the key,
//!   so a plain and a zstd copy of the same content are distinct blobs.
//! - the manifest slot: a single mutable pointer, plus a retained copy of
//!   every committed version. A commit writes the version object first and
//!   then swaps the pointer, so the pointer never names a missing version.

use super::{KeyLayout, RemoteStore};
use crate::config::Compression;
use crate::error::{BackupError, Result};
use crate::hash::Digest;
use crate::sync::Manifest;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Blob set and manifest slot of one dataset
#[derive(Clone)]
pub struct DatasetStore {
    store: Arc<dyn RemoteStore>,
    layout: KeyLayout,
}

impl DatasetStore {
    /// Bind `dataset` (below an optional key prefix) to a store
    pub fn new(store: Arc<dyn RemoteStore>, prefix: Option<&str>, dataset: &str) -> Result<Self> {
        Ok(Self {
            store,
            layout: KeyLayout::new(prefix, dataset)?,
        })
    }

    /// Dataset identifier
    pub fn dataset(&self) -> &str {
        self.layout.dataset()
    }

    /// Key layout in use
    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Location of the underlying store
    pub fn describe(&self) -> String {
        self.store.describe()
    }

    // Blob set

    /// Whether a blob is stored in the given encoding
    pub fn has_blob(&self, digest: &Digest, compression: Compression) -> Result<bool> {
        Ok(self.store.exists(&self.layout.blob_key(digest, compression))?)
    }

    /// Every stored blob with its encoding
    pub fn list_all_blobs(&self) -> Result<BTreeSet<(Digest, Compression)>> {
        let keys = self.store.list(&self.layout.blobs_prefix())?;
        let mut blobs = BTreeSet::new();
        for key in keys {
            match self.layout.parse_blob_key(key.as_str()) {
                Some(blob) => {
                    blobs.insert(blob);
                }
                None => tracing::warn!("Ignoring unexpected object under blob prefix: {}", key),
            }
        }
        Ok(blobs)
    }

    /// Digests of the blobs stored in the given encoding
    pub fn list_blobs(&self, compression: Compression) -> Result<BTreeSet<Digest>> {
        Ok(self
            .list_all_blobs()?
            .into_iter()
            .filter(|(_, c)| *c == compression)
            .map(|(digest, _)| digest)
            .collect())
    }

    /// Store an encoded blob body unless the blob already exists
    ///
    /// Returns whether a write happened.
    pub fn put_blob(&self, digest: &Digest, compression: Compression, body: &[u8]) -> Result<bool> {
        let key = self.layout.blob_key(digest, compression);
        if self.store.exists(&key)? {
            tracing::debug!("Blob {} already stored", digest.short());
            return Ok(false);
        }
        self.store.put(&key, body)?;
        Ok(true)
    }

    /// Fetch an encoded blob body
    pub fn get_blob(&self, digest: &Digest, compression: Compression) -> Result<Vec<u8>> {
        Ok(self.store.get(&self.layout.blob_key(digest, compression))?)
    }

    /// Remove a blob
    pub fn delete_blob(&self, digest: &Digest, compression: Compression) -> Result<()> {
        Ok(self.store.delete(&self.layout.blob_key(digest, compression))?)
    }

    // Manifest slot

    /// Current manifest, or `None` when nothing was committed yet
    pub fn load_manifest(&self) -> Result<Option<Manifest>> {
        match self.store.get(&self.layout.manifest_key()) {
            Ok(body) => self.decode_manifest(&body).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Current manifest, failing with `ManifestNotFound` when absent
    pub fn require_manifest(&self) -> Result<Manifest> {
        self.load_manifest()?
            .ok_or_else(|| BackupError::ManifestNotFound {
                dataset: self.dataset().to_string(),
            })
    }

    /// Publish `manifest` as the new current version
    ///
    /// Returns the version id under which it was retained.
    pub fn commit_manifest(&self, manifest: &Manifest) -> Result<String> {
        if manifest.dataset != self.dataset() {
            return Err(BackupError::Manifest(format!(
                "Manifest for dataset '{}' cannot be committed to '{}'",
                manifest.dataset,
                self.dataset()
            )));
        }
        manifest.validate()?;

        let version = manifest.version_id();
        let body = manifest.to_json()?;
        self.store.put(&self.layout.version_key(&version), &body)?;
        self.store.put(&self.layout.manifest_key(), &body)?;
        tracing::info!(
            "Committed manifest {} for dataset {} ({} files)",
            version,
            self.dataset(),
            manifest.file_count()
        );
        Ok(version)
    }

    /// Retained version ids, oldest first
    pub fn list_manifest_versions(&self) -> Result<Vec<String>> {
        let keys = self.store.list(&self.layout.versions_prefix())?;
        let mut versions: Vec<String> = keys
            .iter()
            .filter_map(|k| self.layout.version_from_key(k.as_str()))
            .map(str::to_string)
            .collect();
        versions.sort();
        Ok(versions)
    }

    /// A retained manifest version
    pub fn load_manifest_version(&self, version: &str) -> Result<Manifest> {
        if version.is_empty() || version.contains('/') {
            return Err(BackupError::config(format!("Invalid version id '{}'", version)));
        }
        match self.store.get(&self.layout.version_key(version)) {
            Ok(body) => self.decode_manifest(&body),
            Err(e) if e.is_not_found() => Err(BackupError::ManifestNotFound {
                dataset: format!("{}@{}", self.dataset(), version),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a retained manifest version
    pub fn delete_manifest_version(&self, version: &str) -> Result<()> {
        Ok(self.store.delete(&self.layout.version_key(version))?)
    }

    fn decode_manifest(&self, body: &[u8]) -> Result<Manifest> {
        let manifest = Manifest::from_json(body)?;
        if manifest.dataset != self.dataset() {
            return Err(BackupError::Manifest(format!(
                "Stored manifest belongs to dataset '{}', expected '{}'",
                manifest.dataset,
                self.dataset()
            )));
        }
        Ok(manifest)
    }
}
