//! Backend trait for pluggable persistent stores.
//!
//! The staging tier drives any store that can upsert, fetch, and delete
//! entries by key. Implementations should be thread-safe and support
//! concurrent access; the facade shares one handle between callers and the
//! queue worker.

use async_trait::async_trait;
use spillway_core::{BackendError, CacheEntry};
use std::collections::HashSet;

/// Persistent store behind the staging tier.
///
/// # Required semantics
///
/// - `put` has upsert semantics: a key collision overwrites the stored row.
/// - `remove` is idempotent: removing an absent key succeeds and returns
///   `false`.
/// - `get` returns `None` for absent **and** expired entries.
///
/// # Errors
///
/// Transient errors (connection loss, query failures, timeouts) are retried
/// at the queue level by dropping the single event; see
/// [`BackendError::is_transient`].
#[async_trait]
pub trait SpoolBackend: Send + Sync {
    /// Persist an entry, overwriting any row stored under the same key.
    async fn put(&self, entry: &CacheEntry) -> Result<(), BackendError>;

    /// Fetch the entry stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, BackendError>;

    /// Delete the entry stored under `key`.
    ///
    /// Returns `true` iff the store observed something to delete.
    async fn remove(&self, key: &str) -> Result<bool, BackendError>;

    /// Delete every entry in this store's region.
    async fn remove_all(&self) -> Result<(), BackendError>;

    /// Number of entries currently stored in this store's region.
    async fn size(&self) -> Result<u64, BackendError>;

    /// Keys belonging to the named group.
    ///
    /// Optional; backends without group support answer
    /// [`BackendError::Unsupported`].
    async fn group_keys(&self, group: &str) -> Result<HashSet<String>, BackendError>;

    /// Release backend resources. Further calls may fail with
    /// [`BackendError::Disposed`].
    async fn dispose(&self);
}
