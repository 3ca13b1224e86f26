//! The purgatory: a staging map for in-flight writes.
//!
//! Entries accepted by the facade wait here between acknowledgement and
//! persistence. A read that arrives while an entry is still staged rescues it
//! synchronously and marks it non-spoolable so the queue worker skips the
//! write.
//!
//! Items carry a generation tag assigned at insertion. The worker removes the
//! item it actually wrote via [`Purgatory::remove_if_generation`], so an
//! overwrite racing in behind the worker's backend call keeps its fresh item;
//! the stale queued event then finds a different generation and no-ops.

use spillway_core::CacheEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// An entry staged for asynchronous persistence.
#[derive(Debug, Clone)]
pub struct PurgatoryItem {
    /// The staged entry.
    pub entry: CacheEntry,
    /// Whether the queue worker is still permitted to persist this item.
    /// Flipped to false when a read rescues it. Mutated only while the
    /// per-key write lock is held.
    pub spoolable: bool,
    generation: u64,
}

impl PurgatoryItem {
    /// Insertion generation of this item.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Concurrent staging map, key to [`PurgatoryItem`].
///
/// All operations are O(1) average and atomic per key. Iteration is not
/// offered; the queue carries keys and reads items back individually.
#[derive(Debug, Default)]
pub struct Purgatory {
    items: RwLock<HashMap<String, PurgatoryItem>>,
    generation: AtomicU64,
}

impl Purgatory {
    /// Create an empty purgatory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `entry` as spoolable, replacing any prior item for the key.
    ///
    /// Returns the generation assigned to the new item. A replaced item
    /// becomes unreachable; its queued event will no-op.
    pub fn insert(&self, entry: CacheEntry) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let item = PurgatoryItem {
            entry,
            spoolable: true,
            generation,
        };
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.insert(item.entry.key.clone(), item);
        generation
    }

    /// Fetch a clone of the item staged under `key`.
    pub fn get(&self, key: &str) -> Option<PurgatoryItem> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        items.get(key).cloned()
    }

    /// Whether an item is staged under `key`.
    pub fn contains(&self, key: &str) -> bool {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        items.contains_key(key)
    }

    /// Flip the spoolable flag of the item staged under `key`.
    ///
    /// Returns `false` when no item is staged. Callers must hold the per-key
    /// write lock.
    pub fn set_spoolable(&self, key: &str, spoolable: bool) -> bool {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        match items.get_mut(key) {
            Some(item) => {
                item.spoolable = spoolable;
                true
            }
            None => false,
        }
    }

    /// Remove and return the item staged under `key`.
    pub fn remove(&self, key: &str) -> Option<PurgatoryItem> {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.remove(key)
    }

    /// Remove the item staged under `key` only if it still carries
    /// `generation`.
    ///
    /// Returns `true` iff an item was removed. Used by the queue worker after
    /// a successful backend write so a newer overwrite is never deleted.
    pub fn remove_if_generation(&self, key: &str, generation: u64) -> bool {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        match items.get(key) {
            Some(item) if item.generation == generation => {
                items.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Replace the map with a fresh empty one, returning the number of items
    /// discarded. Queued events for the old items will no-op.
    pub fn swap_empty(&self) -> usize {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        let old = std::mem::take(&mut *items);
        old.len()
    }

    /// Number of staged items.
    pub fn len(&self) -> usize {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        items.len()
    }

    /// Whether no items are staged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(key: &str, value: &str) -> CacheEntry {
        CacheEntry::eternal(key.to_string(), value.to_string())
    }

    #[test]
    fn test_insert_get_remove() {
        let purgatory = Purgatory::new();

        purgatory.insert(staged("a", "1"));
        assert!(purgatory.contains("a"));

        let item = purgatory.get("a").expect("item should be staged");
        assert!(item.spoolable);
        assert_eq!(item.entry.value, "1");

        let removed = purgatory.remove("a").expect("remove should return item");
        assert_eq!(removed.entry.key, "a");
        assert!(purgatory.is_empty());
    }

    #[test]
    fn test_overwrite_bumps_generation() {
        let purgatory = Purgatory::new();

        let g1 = purgatory.insert(staged("a", "1"));
        let g2 = purgatory.insert(staged("a", "2"));
        assert!(g2 > g1);
        assert_eq!(purgatory.len(), 1);

        let item = purgatory.get("a").expect("item should be staged");
        assert_eq!(item.entry.value, "2");
        assert_eq!(item.generation(), g2);
    }

    #[test]
    fn test_remove_if_generation_skips_newer_item() {
        let purgatory = Purgatory::new();

        let g1 = purgatory.insert(staged("a", "1"));
        let g2 = purgatory.insert(staged("a", "2"));

        // A worker holding the old generation must not delete the overwrite.
        assert!(!purgatory.remove_if_generation("a", g1));
        assert!(purgatory.contains("a"));

        assert!(purgatory.remove_if_generation("a", g2));
        assert!(purgatory.is_empty());
    }

    #[test]
    fn test_set_spoolable() {
        let purgatory = Purgatory::new();

        assert!(!purgatory.set_spoolable("missing", false));

        purgatory.insert(staged("a", "1"));
        assert!(purgatory.set_spoolable("a", false));
        let item = purgatory.get("a").expect("item should be staged");
        assert!(!item.spoolable);
    }

    #[test]
    fn test_swap_empty() {
        let purgatory = Purgatory::new();
        purgatory.insert(staged("a", "1"));
        purgatory.insert(staged("b", "2"));

        assert_eq!(purgatory.swap_empty(), 2);
        assert!(purgatory.is_empty());
        assert!(!purgatory.contains("a"));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Generations are strictly increasing across arbitrary insertions,
        /// so a stale generation can never match a live item.
        #[test]
        fn prop_generations_strictly_increase(keys in proptest::collection::vec("[a-z]{1,4}", 1..20)) {
            let purgatory = Purgatory::new();
            let mut last = 0u64;
            for key in keys {
                let generation = purgatory.insert(CacheEntry::eternal(key, "v"));
                prop_assert!(generation > last);
                last = generation;
            }
        }

        /// After any insert sequence, removing by the latest generation
        /// succeeds and removing by any earlier one does not.
        #[test]
        fn prop_remove_honors_latest_generation(values in proptest::collection::vec("[a-z]{1,4}", 2..10)) {
            let purgatory = Purgatory::new();
            let mut generations = Vec::new();
            for value in &values {
                generations.push(purgatory.insert(CacheEntry::eternal("k", value.clone())));
            }
            let latest = *generations.last().expect("at least two insertions");
            for stale in &generations[..generations.len() - 1] {
                prop_assert!(!purgatory.remove_if_generation("k", *stale));
            }
            prop_assert!(purgatory.remove_if_generation("k", latest));
            prop_assert!(purgatory.is_empty());
        }
    }
}
