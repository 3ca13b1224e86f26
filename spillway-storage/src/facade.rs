//! The cache facade.
//!
//! [`SpoolCache`] is the public face of the tier: it stages accepted entries
//! in the purgatory, queues persistence events for the worker, and rescues
//! staged entries on read. It exclusively owns the purgatory, the event
//! queue, the lock registry and the backend handle; the worker task receives
//! handles to the first three plus the backend, never the facade itself.

use crate::config::SpoolConfig;
use crate::locks::KeyLockRegistry;
use crate::purgatory::Purgatory;
use crate::queue::{run_worker, EventQueue, SpoolEvent, WorkerContext};
use crate::traits::SpoolBackend;
use spillway_core::{CacheEntry, CacheStatus, QueueError, SpillwayError, SpillwayResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const LOG_INTERVAL: u64 = 100;

/// Counters shared between the facade and the queue worker.
#[derive(Debug, Default)]
pub(crate) struct SpoolCounters {
    pub(crate) update_count: AtomicU64,
    pub(crate) get_count: AtomicU64,
    pub(crate) purgatory_hits: AtomicU64,
    pub(crate) remove_count: AtomicU64,
    pub(crate) backend_error_count: AtomicU64,
    pub(crate) shed_event_count: AtomicU64,
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone)]
pub struct SpoolStats {
    /// Accepted `update` calls.
    pub update_count: u64,
    /// `get` calls while alive.
    pub get_count: u64,
    /// Reads answered from the purgatory (cancelled writes).
    pub purgatory_hits: u64,
    /// `remove` calls while alive.
    pub remove_count: u64,
    /// Backend errors observed by the worker.
    pub backend_error_count: u64,
    /// Events dropped on backpressure or drained as no-ops after destroy.
    pub shed_event_count: u64,
    /// Entries currently staged.
    pub purgatory_size: usize,
    /// Events currently queued.
    pub queue_depth: usize,
    /// Whether the event queue reached its terminal destroyed state.
    pub queue_destroyed: bool,
}

/// Write-back auxiliary cache over a pluggable persistent backend.
///
/// `update` acknowledges synchronously and persists asynchronously; a `get`
/// that arrives before the write happens rescues the entry from the staging
/// tier and withdraws the pending write. Losing queued entries on crash is
/// acceptable by design: this is an auxiliary tier, not a log.
///
/// # Example
///
/// ```ignore
/// let backend = Arc::new(MemoryBackend::new());
/// let cache = SpoolCache::new("prices", backend, SpoolConfig::default());
///
/// cache.update(CacheEntry::eternal("BTC", payload)).await?;
/// let hot = cache.get("BTC").await;   // rescued from staging, write cancelled
/// cache.dispose().await;              // drains the queue, then stops
/// ```
pub struct SpoolCache {
    name: String,
    status: RwLock<CacheStatus>,
    purgatory: Arc<Purgatory>,
    locks: Arc<KeyLockRegistry>,
    backend: Arc<dyn SpoolBackend>,
    queue: EventQueue,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<SpoolCounters>,
}

impl SpoolCache {
    /// Create a cache over `backend` and start its queue worker.
    ///
    /// Must be called within a tokio runtime. The returned facade is
    /// [`CacheStatus::Alive`].
    pub fn new(name: impl Into<String>, backend: Arc<dyn SpoolBackend>, config: SpoolConfig) -> Self {
        let name = name.into();
        let purgatory = Arc::new(Purgatory::new());
        let locks = Arc::new(KeyLockRegistry::new());
        let counters = Arc::new(SpoolCounters::default());
        let (queue, rx) = EventQueue::channel(config.queue_capacity, config.append_timeout);

        let ctx = WorkerContext {
            cache_name: name.clone(),
            purgatory: Arc::clone(&purgatory),
            locks: Arc::clone(&locks),
            backend: Arc::clone(&backend),
            counters: Arc::clone(&counters),
            destroyed: queue.destroyed_flag(),
            max_consecutive_errors: config.max_consecutive_errors,
        };
        let worker = tokio::spawn(run_worker(rx, ctx));

        tracing::info!(
            cache = %name,
            queue_capacity = config.queue_capacity,
            "spool cache started"
        );

        Self {
            name,
            status: RwLock::new(CacheStatus::Alive),
            purgatory,
            locks,
            backend,
            queue,
            worker: Mutex::new(Some(worker)),
            counters,
        }
    }

    /// Region label of this cache.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle status.
    pub fn status(&self) -> CacheStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: CacheStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Accept an entry for asynchronous persistence.
    ///
    /// Stages the entry, queues a put event, and returns without touching
    /// the backend. A prior staged item under the same key is replaced.
    ///
    /// Not `Alive` (or after the queue was destroyed): the call is a silent
    /// no-op; the stats surface is the place to observe a degraded tier.
    ///
    /// # Errors
    ///
    /// `InvalidEntry` for an empty key; a queue error only when the worker
    /// is gone, in which case the cache also moves to `Disposing`.
    pub async fn update(&self, mut entry: CacheEntry) -> SpillwayResult<()> {
        if !self.status().is_alive() {
            tracing::trace!(cache = %self.name, key = %entry.key, "update on non-alive cache ignored");
            return Ok(());
        }
        if entry.key.is_empty() {
            return Err(SpillwayError::InvalidEntry {
                reason: "key must be non-empty".to_string(),
            });
        }
        if entry.attributes.create_time_ms == 0 {
            entry.attributes.create_time_ms = CacheEntry::now_ms();
        }

        let count = self.counters.update_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % LOG_INTERVAL == 0 {
            tracing::debug!(cache = %self.name, update_count = count, "update count");
        }

        let key = entry.key.clone();
        let generation = self.purgatory.insert(entry);

        let event = SpoolEvent::Put {
            key: key.clone(),
            generation,
        };
        match self.queue.append(event).await {
            Ok(()) => Ok(()),
            Err(QueueError::Full { capacity }) => {
                // Default backpressure policy: the write is shed, the caller
                // is acknowledged. The primary tier's correctness does not
                // depend on ours.
                tracing::warn!(cache = %self.name, key = %key, capacity, "event queue full, write shed");
                self.counters.shed_event_count.fetch_add(1, Ordering::Relaxed);
                self.purgatory.remove_if_generation(&key, generation);
                Ok(())
            }
            Err(QueueError::Destroyed) if self.queue.is_destroyed() => {
                tracing::trace!(cache = %self.name, key = %key, "event queue destroyed, write shed");
                self.counters.shed_event_count.fetch_add(1, Ordering::Relaxed);
                self.purgatory.remove_if_generation(&key, generation);
                Ok(())
            }
            Err(err) => {
                // The worker is gone without the queue being destroyed
                // first; nothing will drain the channel again.
                tracing::error!(cache = %self.name, error = %err, "event queue unusable, disposing cache");
                self.set_status(CacheStatus::Disposing);
                self.queue.destroy();
                Err(err.into())
            }
        }
    }

    /// Fetch an entry, preferring the staging tier.
    ///
    /// A purgatory hit marks the item non-spoolable under the per-key write
    /// lock, removes it, and returns it synchronously: the pending write is
    /// withdrawn. Otherwise the backend is consulted.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        if !self.status().is_alive() {
            return None;
        }
        let count = self.counters.get_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % LOG_INTERVAL == 0 {
            tracing::debug!(cache = %self.name, get_count = count, "get count");
        }

        if self.purgatory.contains(key) {
            let _guard = self.locks.write(key).await;
            // Re-check: the worker or a remove may have won the lock first.
            if self.purgatory.set_spoolable(key, false) {
                if let Some(item) = self.purgatory.remove(key) {
                    let hits = self.counters.purgatory_hits.fetch_add(1, Ordering::Relaxed) + 1;
                    if hits % LOG_INTERVAL == 0 {
                        tracing::debug!(cache = %self.name, purgatory_hits = hits, "purgatory hits");
                    }
                    tracing::trace!(cache = %self.name, key = %key, "rescued from purgatory");
                    return Some(item.entry);
                }
            }
        }

        match self.backend.get(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(cache = %self.name, key = %key, error = %e, "backend get failed, destroying event queue");
                self.queue.destroy();
                None
            }
        }
    }

    /// Remove an entry synchronously, bypassing the queue.
    ///
    /// Returns the backend's verdict: `true` iff a stored row was deleted.
    /// A staged item under the key is discarded either way.
    pub async fn remove(&self, key: &str) -> bool {
        if !self.status().is_alive() {
            return false;
        }
        self.counters.remove_count.fetch_add(1, Ordering::Relaxed);

        let _guard = self.locks.write(key).await;
        self.purgatory.remove(key);
        match self.backend.remove(key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(cache = %self.name, key = %key, error = %e, "backend remove failed");
                false
            }
        }
    }

    /// Remove every entry synchronously.
    ///
    /// The purgatory is swapped for a fresh map, so events already queued for
    /// the old items no-op, then the backend region is cleared.
    pub async fn remove_all(&self) {
        if !self.status().is_alive() {
            return;
        }
        let discarded = self.purgatory.swap_empty();
        if discarded > 0 {
            tracing::debug!(cache = %self.name, discarded, "discarded staged items on remove_all");
        }
        if let Err(e) = self.backend.remove_all().await {
            tracing::warn!(cache = %self.name, error = %e, "backend remove_all failed");
        }
    }

    /// Shut the cache down: drain the queue, stop the worker, dispose the
    /// backend.
    ///
    /// The drain is graceful: a terminal dispose marker is queued behind any
    /// pending events, so everything accepted before this call is still
    /// persisted. Idempotent; errors are swallowed.
    pub async fn dispose(&self) {
        {
            let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
            if !status.is_alive() {
                return;
            }
            *status = CacheStatus::Disposing;
        }
        tracing::info!(cache = %self.name, "disposing spool cache");

        if self.queue.append_dispose().await.is_err() {
            // Worker already gone; nothing left to drain.
            self.queue.destroy();
        }
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(cache = %self.name, error = %e, "spool worker ended abnormally");
            }
        }
        self.backend.dispose().await;
        self.set_status(CacheStatus::Disposed);

        let stats = self.stats();
        tracing::info!(
            cache = %self.name,
            update_count = stats.update_count,
            get_count = stats.get_count,
            purgatory_hits = stats.purgatory_hits,
            shed_event_count = stats.shed_event_count,
            "spool cache disposed"
        );
    }

    /// Number of entries in the persistent tier.
    pub async fn size(&self) -> u64 {
        if !self.status().is_alive() {
            return 0;
        }
        match self.backend.size().await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(cache = %self.name, error = %e, "backend size failed");
                0
            }
        }
    }

    /// Keys belonging to the named group, where the backend supports groups.
    pub async fn group_keys(&self, group: &str) -> SpillwayResult<HashSet<String>> {
        if !self.status().is_alive() {
            return Ok(HashSet::new());
        }
        self.backend.group_keys(group).await.map_err(Into::into)
    }

    /// Snapshot of the counters plus the live queue and purgatory gauges.
    pub fn stats(&self) -> SpoolStats {
        SpoolStats {
            update_count: self.counters.update_count.load(Ordering::Relaxed),
            get_count: self.counters.get_count.load(Ordering::Relaxed),
            purgatory_hits: self.counters.purgatory_hits.load(Ordering::Relaxed),
            remove_count: self.counters.remove_count.load(Ordering::Relaxed),
            backend_error_count: self.counters.backend_error_count.load(Ordering::Relaxed),
            shed_event_count: self.counters.shed_event_count.load(Ordering::Relaxed),
            purgatory_size: self.purgatory.len(),
            queue_depth: self.queue.depth(),
            queue_destroyed: self.queue.is_destroyed(),
        }
    }
}
