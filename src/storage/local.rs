//! Directory-backed object store
//!
//! Maps each key onto a file below a root directory. Useful for backups to
//! a mounted volume and for exercising the engines without a network.

use super::{ObjectKey, RemoteStore};
use crate::error::{StoreError, StoreResult};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use walkdir::WalkDir;

const TEMP_SUFFIX: &str = ".bm-upload";

/// Object store rooted at a local directory
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    counter: AtomicU64,
}

impl LocalStore {
    /// Create a store, creating the root directory if needed
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| classify(&root, e))?;
        Ok(Self {
            root,
            counter: AtomicU64::new(0),
        })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &ObjectKey) -> StoreResult<PathBuf> {
        let key = key.as_str();
        let valid = !key.is_empty()
            && key
                .split('/')
                .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
            && !key.ends_with(TEMP_SUFFIX);
        if !valid {
            return Err(StoreError::Fatal(format!("Invalid object key '{}'", key)));
        }
        Ok(key.split('/').fold(self.root.clone(), |path, seg| path.join(seg)))
    }
}

fn classify(path: &Path, err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(path.display().to_string()),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            StoreError::Transient(format!("{}: {}", path.display(), err))
        }
        _ => StoreError::Fatal(format!("{}: {}", path.display(), err)),
    }
}

impl RemoteStore for LocalStore {
    fn put(&self, key: &ObjectKey, body: &[u8]) -> StoreResult<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| classify(parent, e))?;
        }

        let unique = self.counter.fetch_add(1, Ordering::Relaxed);
        let temp = path.with_file_name(format!(
            "{}.{}.{}{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            std::process::id(),
            unique,
            TEMP_SUFFIX
        ));

        let written = File::create(&temp)
            .and_then(|mut file| {
                file.write_all(body)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&temp, &path));

        written.map_err(|e| {
            let _ = fs::remove_file(&temp);
            StoreError::Fatal(format!("{}: {}", path.display(), e))
        })
    }

    fn get(&self, key: &ObjectKey) -> StoreResult<Vec<u8>> {
        let path = self.object_path(key)?;
        fs::read(&path).map_err(|e| match classify(&path, e) {
            StoreError::NotFound(_) => StoreError::NotFound(key.to_string()),
            other => other,
        })
    }

    fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
        let path = self.object_path(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(classify(&path, e)),
        }
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectKey>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| StoreError::Fatal(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) && !key.ends_with(TEMP_SUFFIX) {
                keys.push(ObjectKey::new(key));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(classify(&path, e)),
        }
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
