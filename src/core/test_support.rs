//! Fixtures shared by the engine tests

use crate::storage::{DatasetStore, MemoryStore, RetryPolicy, RetryingStore};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Write `files` (relative path, content) below `root`
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (path, content) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }
}

/// Dataset `knowledge` on a fresh in-memory store
pub fn memory_dataset() -> (Arc<MemoryStore>, DatasetStore) {
    let memory = Arc::new(MemoryStore::new());
    let store = DatasetStore::new(memory.clone(), None, "knowledge").unwrap();
    (memory, store)
}

/// Dataset `knowledge` on an in-memory store behind a fast retry wrapper
pub fn retrying_memory_dataset(max_attempts: u32) -> (Arc<MemoryStore>, DatasetStore) {
    let memory = Arc::new(MemoryStore::new());
    let policy = RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        multiplier: 2,
    };
    let retrying = Arc::new(RetryingStore::new(memory.clone(), policy));
    let store = DatasetStore::new(retrying, None, "knowledge").unwrap();
    (memory, store)
}

/// Number of blob objects in the store
pub fn blob_count(memory: &MemoryStore) -> usize {
    memory
        .keys()
        .iter()
        .filter(|k| k.starts_with("knowledge/blobs/"))
        .count()
}
