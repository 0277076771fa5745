//! In-memory object store
//!
//! Keeps objects in a sorted map. Supports fault injection so retry and
//! abort paths can be driven deterministically.

use super::{ObjectKey, RemoteStore};
use crate::error::{StoreError, StoreResult};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Kind of failure injected into puts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Retryable failure
    Transient,
    /// Permanent failure
    Fatal,
}

/// Object store held in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_next: AtomicUsize,
    offline: AtomicBool,
    put_fault: Mutex<Option<(String, Fault)>>,
    operations: AtomicU64,
    puts: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail transiently
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Make every operation fail transiently until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make puts of keys starting with `prefix` fail
    pub fn fail_puts_with_prefix(&self, prefix: &str, fault: Fault) {
        *self.lock_fault() = Some((prefix.to_string(), fault));
    }

    /// Remove the put fault
    pub fn clear_put_fault(&self) {
        *self.lock_fault() = None;
    }

    /// Overwrite an object's bytes without going through `put`
    pub fn corrupt(&self, key: &str, body: &[u8]) {
        self.lock().insert(key.to_string(), body.to_vec());
    }

    /// Every stored key
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Operations attempted so far, including failed ones
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Successful puts so far
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_fault(&self) -> std::sync::MutexGuard<'_, Option<(String, Fault)>> {
        self.put_fault
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_fault(&self) -> StoreResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("store offline".to_string()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Transient("injected failure".to_string()));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryStore {
    fn put(&self, key: &ObjectKey, body: &[u8]) -> StoreResult<()> {
        self.check_fault()?;
        if let Some((prefix, fault)) = self.lock_fault().as_ref() {
            if key.as_str().starts_with(prefix.as_str()) {
                let message = format!("put rejected: {}", key);
                return Err(match fault {
                    Fault::Transient => StoreError::Transient(message),
                    Fault::Fatal => StoreError::Fatal(message),
                });
            }
        }
        self.lock().insert(key.as_str().to_string(), body.to_vec());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, key: &ObjectKey) -> StoreResult<Vec<u8>> {
        self.check_fault()?;
        self.lock()
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
        self.check_fault()?;
        Ok(self.lock().contains_key(key.as_str()))
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectKey>> {
        self.check_fault()?;
        Ok(self
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| ObjectKey::new(k.clone()))
            .collect())
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.check_fault()?;
        self.lock().remove(key.as_str());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}
