//! Atomic file placement for restore
//!
//! Content is written to a temporary sibling and renamed over the target,
//! so an interrupted restore never leaves a half-written file at a manifest
//! path.

use crate::error::{IoResultExt, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Marker embedded in temporary file names
pub const TEMP_MARKER: &str = ".bm-partial-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(
        ".{}{}{}-{}",
        name,
        TEMP_MARKER,
        std::process::id(),
        unique
    ))
}

/// Write `data` to `path` atomically and set its modification time
pub fn write_file_atomic(path: &Path, data: &[u8], mtime: i64, mtime_nanos: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }

    let temp = temp_sibling(path);
    let written = (|| -> Result<()> {
        let mut file = File::create(&temp).with_path(&temp)?;
        file.write_all(data).with_path(&temp)?;
        file.sync_all().with_path(&temp)?;
        drop(file);
        filetime::set_file_mtime(&temp, filetime::FileTime::from_unix_time(mtime, mtime_nanos))
            .with_path(&temp)?;
        fs::rename(&temp, path).with_path(path)
    })();

    if written.is_err() {
        let _ = fs::remove_file(&temp);
    }
    written
}

/// Set a file's modification time
pub fn set_mtime(path: &Path, mtime: i64, mtime_nanos: u32) -> Result<()> {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(mtime, mtime_nanos))
        .with_path(path)
}

/// Whether a file name belongs to an interrupted atomic write
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}
