//! Object storage module
//!
//! Provides the `RemoteStore` abstraction over an object namespace, with
//! S3-compatible, local-directory and in-memory implementations, a bounded
//! retry wrapper, and `DatasetStore`, which layers the blob set and the
//! manifest slot of one dataset on top of any store.

mod blob;
mod dataset;
mod keys;
mod local;
mod memory;
mod retry;
mod s3;

pub use blob::*;
pub use dataset::*;
pub use keys::*;
pub use local::*;
pub use memory::*;
pub use retry::*;
pub use s3::*;

use crate::error::StoreResult;
use std::sync::Arc;

/// Key/value object namespace
///
/// Implementations perform a single attempt per call and classify failures
/// into `StoreError` variants; retrying is the job of `RetryingStore`.
pub trait RemoteStore: Send + Sync {
    /// Store `body` under `key`, replacing any previous object
    fn put(&self, key: &ObjectKey, body: &[u8]) -> StoreResult<()>;

    /// Fetch the object stored under `key`
    fn get(&self, key: &ObjectKey) -> StoreResult<Vec<u8>>;

    /// Whether an object exists under `key`
    fn exists(&self, key: &ObjectKey) -> StoreResult<bool>;

    /// All keys starting with `prefix`
    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectKey>>;

    /// Remove the object under `key`; removing a missing object succeeds
    fn delete(&self, key: &ObjectKey) -> StoreResult<()>;

    /// Human-readable location, used in logs
    fn describe(&self) -> String;
}

impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    fn put(&self, key: &ObjectKey, body: &[u8]) -> StoreResult<()> {
        (**self).put(key, body)
    }

    fn get(&self, key: &ObjectKey) -> StoreResult<Vec<u8>> {
        (**self).get(key)
    }

    fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
        (**self).exists(key)
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectKey>> {
        (**self).list(prefix)
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        (**self).delete(key)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<S: RemoteStore + ?Sized> RemoteStore for Box<S> {
    fn put(&self, key: &ObjectKey, body: &[u8]) -> StoreResult<()> {
        (**self).put(key, body)
    }

    fn get(&self, key: &ObjectKey) -> StoreResult<Vec<u8>> {
        (**self).get(key)
    }

    fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
        (**self).exists(key)
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectKey>> {
        (**self).list(prefix)
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        (**self).delete(key)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
