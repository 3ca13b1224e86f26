//! In-memory backend.
//!
//! The simplest conforming [`SpoolBackend`]: a guarded hash map with expiry
//! honored on read. Used throughout the test suites and suitable as a
//! stand-in wherever durability is not required.

use crate::traits::SpoolBackend;
use async_trait::async_trait;
use spillway_core::{BackendError, CacheEntry, NAME_COMPONENT_DELIMITER};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// RwLock-guarded map backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
    disposed: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired rows included.
    pub fn entry_count(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// Drop expired entries, returning how many were removed. The in-memory
    /// equivalent of the tabular backend's expiry sweep.
    pub fn sweep_expired(&self) -> usize {
        let now_s = CacheEntry::now_ms() / 1000;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| !entry.attributes.is_expired_at(now_s));
        before - entries.len()
    }

    fn check_alive(&self) -> Result<(), BackendError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(BackendError::Disposed);
        }
        Ok(())
    }
}

#[async_trait]
impl SpoolBackend for MemoryBackend {
    async fn put(&self, entry: &CacheEntry) -> Result<(), BackendError> {
        self.check_alive()?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, BackendError> {
        self.check_alive()?;
        let now_s = CacheEntry::now_ms() / 1000;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(key)
            .filter(|entry| !entry.attributes.is_expired_at(now_s))
            .cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool, BackendError> {
        self.check_alive()?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries.remove(key).is_some())
    }

    async fn remove_all(&self) -> Result<(), BackendError> {
        self.check_alive()?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
        Ok(())
    }

    async fn size(&self) -> Result<u64, BackendError> {
        self.check_alive()?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.len() as u64)
    }

    async fn group_keys(&self, group: &str) -> Result<HashSet<String>, BackendError> {
        self.check_alive()?;
        let prefix = format!("{}{}", group, NAME_COMPONENT_DELIMITER);
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::ElementAttributes;

    #[tokio::test]
    async fn test_put_overwrites_on_collision() {
        let backend = MemoryBackend::new();
        backend
            .put(&CacheEntry::eternal("a", "1"))
            .await
            .expect("put should succeed");
        backend
            .put(&CacheEntry::eternal("a", "2"))
            .await
            .expect("put should succeed");

        let stored = backend.get("a").await.expect("get should succeed");
        assert_eq!(stored.expect("entry should exist").value, "2");
        assert_eq!(backend.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let backend = MemoryBackend::new();
        backend
            .put(&CacheEntry::eternal("a", "1"))
            .await
            .expect("put should succeed");

        assert!(backend.remove("a").await.expect("remove should succeed"));
        assert!(!backend.remove("a").await.expect("remove should succeed"));
    }

    #[tokio::test]
    async fn test_get_hides_expired_entry() {
        let backend = MemoryBackend::new();
        let mut entry = CacheEntry::new("d", "3", ElementAttributes::with_max_life(1));
        // Created long enough ago to be past its lifetime.
        entry.attributes.create_time_ms = CacheEntry::now_ms().saturating_sub(10_000);
        backend.put(&entry).await.expect("put should succeed");

        let stored = backend.get("d").await.expect("get should succeed");
        assert!(stored.is_none(), "expired entry must read as absent");
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_keeps_eternal() {
        let backend = MemoryBackend::new();

        let mut mortal = CacheEntry::new("d", "3", ElementAttributes::with_max_life(1));
        mortal.attributes.create_time_ms = CacheEntry::now_ms().saturating_sub(10_000);
        let mut eternal = CacheEntry::eternal("e", "4");
        eternal.attributes.create_time_ms = CacheEntry::now_ms().saturating_sub(10_000);

        backend.put(&mortal).await.expect("put should succeed");
        backend.put(&eternal).await.expect("put should succeed");

        assert_eq!(backend.sweep_expired(), 1);
        assert!(backend
            .get("e")
            .await
            .expect("get should succeed")
            .is_some());
        assert!(backend
            .get("d")
            .await
            .expect("get should succeed")
            .is_none());
    }

    #[tokio::test]
    async fn test_group_keys_match_prefix() {
        let backend = MemoryBackend::new();
        backend
            .put(&CacheEntry::eternal("sessions:1", "a"))
            .await
            .expect("put should succeed");
        backend
            .put(&CacheEntry::eternal("sessions:2", "b"))
            .await
            .expect("put should succeed");
        backend
            .put(&CacheEntry::eternal("users:1", "c"))
            .await
            .expect("put should succeed");

        let keys = backend
            .group_keys("sessions")
            .await
            .expect("group_keys should succeed");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("sessions:1"));
        assert!(keys.contains("sessions:2"));
    }

    #[tokio::test]
    async fn test_disposed_backend_rejects_operations() {
        let backend = MemoryBackend::new();
        backend.dispose().await;

        let result = backend.put(&CacheEntry::eternal("a", "1")).await;
        assert_eq!(result, Err(BackendError::Disposed));
        assert_eq!(backend.get("a").await, Err(BackendError::Disposed));
    }
}
