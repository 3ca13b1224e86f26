//! Per-key readers/writer lock registry.
//!
//! Every mutation that crosses the is-it-still-spoolable decision boundary
//! serializes through the write lock for its key: the facade's rescue path,
//! the synchronous remove path, and the queue worker's persistence path.
//! Slots are reference counted and reclaimed when the last guard drops, which
//! bounds memory under key churn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

struct Slot {
    lock: Arc<RwLock<()>>,
    holders: usize,
}

/// Registry of per-key readers/writer locks.
#[derive(Default)]
pub struct KeyLockRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl KeyLockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock for `key`, creating the slot if needed.
    pub async fn write(&self, key: &str) -> KeyWriteGuard<'_> {
        let lock = self.checkout(key);
        let permit = lock.write_owned().await;
        KeyWriteGuard {
            registry: self,
            key: key.to_string(),
            permit: Some(permit),
        }
    }

    /// Acquire a read lock for `key`, creating the slot if needed.
    pub async fn read(&self, key: &str) -> KeyReadGuard<'_> {
        let lock = self.checkout(key);
        let permit = lock.read_owned().await;
        KeyReadGuard {
            registry: self,
            key: key.to_string(),
            permit: Some(permit),
        }
    }

    /// Number of live slots. Zero once every guard has dropped.
    pub fn slot_count(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.len()
    }

    fn checkout(&self, key: &str) -> Arc<RwLock<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            lock: Arc::new(RwLock::new(())),
            holders: 0,
        });
        slot.holders += 1;
        Arc::clone(&slot.lock)
    }

    fn release(&self, key: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(key) {
            slot.holders -= 1;
            if slot.holders == 0 {
                slots.remove(key);
            }
        }
    }
}

/// RAII write guard; the slot is released when dropped.
pub struct KeyWriteGuard<'a> {
    registry: &'a KeyLockRegistry,
    key: String,
    permit: Option<OwnedRwLockWriteGuard<()>>,
}

impl Drop for KeyWriteGuard<'_> {
    fn drop(&mut self) {
        // The permit must drop before the holder count, otherwise a fresh
        // slot could hand out a second writer while this one is still held.
        self.permit.take();
        self.registry.release(&self.key);
    }
}

/// RAII read guard; the slot is released when dropped.
pub struct KeyReadGuard<'a> {
    registry: &'a KeyLockRegistry,
    key: String,
    permit: Option<OwnedRwLockReadGuard<()>>,
}

impl Drop for KeyReadGuard<'_> {
    fn drop(&mut self) {
        self.permit.take();
        self.registry.release(&self.key);
    }
}
