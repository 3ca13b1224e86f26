//! Bounded event queue and its worker.
//!
//! The queue carries keys, not entry data: the worker reads staged items back
//! from the purgatory at dispatch time, which is what lets a read cancel a
//! pending write without scanning the queue. Put events additionally carry
//! the generation of the item they were queued for, so an event whose item
//! was replaced by a later update finds a different generation and no-ops.
//! Events for the same key are processed in submission order; a single worker
//! gives global FIFO, the simplest arrangement that satisfies the per-key
//! requirement.

use crate::facade::SpoolCounters;
use crate::locks::KeyLockRegistry;
use crate::purgatory::Purgatory;
use crate::traits::SpoolBackend;
use spillway_core::QueueError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// A persistence action queued for asynchronous dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpoolEvent {
    /// Persist the item staged under `key`, if it still carries `generation`
    /// and is still spoolable.
    Put { key: String, generation: u64 },
    /// Delete `key` from the backend.
    Remove { key: String },
    /// Delete everything in the backend's region.
    RemoveAll,
    /// Drain-and-stop marker; the worker exits when it dequeues this.
    Dispose,
}

/// Sending half of the event queue.
///
/// A destroyed queue rejects appends; events already queued drain as no-ops.
/// Destruction is terminal and happens on explicit [`destroy`](Self::destroy)
/// or when the worker gives up after repeated backend failures.
pub struct EventQueue {
    tx: mpsc::Sender<SpoolEvent>,
    capacity: usize,
    append_timeout: Duration,
    destroyed: Arc<AtomicBool>,
}

impl EventQueue {
    /// Create a queue bounded at `capacity` together with its receiving half.
    pub(crate) fn channel(
        capacity: usize,
        append_timeout: Duration,
    ) -> (Self, mpsc::Receiver<SpoolEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx,
            capacity,
            append_timeout,
            destroyed: Arc::new(AtomicBool::new(false)),
        };
        (queue, rx)
    }

    pub(crate) fn destroyed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.destroyed)
    }

    /// Append an event, blocking up to the configured backpressure timeout.
    ///
    /// # Errors
    ///
    /// [`QueueError::Destroyed`] when the queue was destroyed or the worker
    /// is gone; [`QueueError::Full`] when the timeout elapsed under
    /// backpressure.
    pub async fn append(&self, event: SpoolEvent) -> Result<(), QueueError> {
        if self.is_destroyed() {
            return Err(QueueError::Destroyed);
        }
        match self.tx.send_timeout(event, self.append_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(QueueError::Full {
                capacity: self.capacity,
            }),
            Err(SendTimeoutError::Closed(_)) => Err(QueueError::Destroyed),
        }
    }

    /// Append the terminal [`SpoolEvent::Dispose`] marker.
    ///
    /// Bypasses the destroyed flag and waits for space: a destroyed queue
    /// still drains, so the marker always gets through unless the worker is
    /// already gone.
    pub(crate) async fn append_dispose(&self) -> Result<(), QueueError> {
        self.tx
            .send(SpoolEvent::Dispose)
            .await
            .map_err(|_| QueueError::Destroyed)
    }

    /// Move the queue to the terminal destroyed state.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    /// Whether the queue is in the destroyed state.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Events currently queued.
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}

/// Everything the worker needs; deliberately not the facade itself.
pub(crate) struct WorkerContext {
    pub(crate) cache_name: String,
    pub(crate) purgatory: Arc<Purgatory>,
    pub(crate) locks: Arc<KeyLockRegistry>,
    pub(crate) backend: Arc<dyn SpoolBackend>,
    pub(crate) counters: Arc<SpoolCounters>,
    pub(crate) destroyed: Arc<AtomicBool>,
    pub(crate) max_consecutive_errors: u32,
}

/// Drain the queue until a `Dispose` marker arrives or every sender is gone.
pub(crate) async fn run_worker(mut rx: mpsc::Receiver<SpoolEvent>, ctx: WorkerContext) {
    tracing::debug!(cache = %ctx.cache_name, "spool worker started");

    let mut consecutive_errors = 0u32;

    while let Some(event) = rx.recv().await {
        match event {
            SpoolEvent::Dispose => {
                tracing::debug!(cache = %ctx.cache_name, "dispose event, worker exiting");
                break;
            }
            _ if ctx.destroyed.load(Ordering::Acquire) => {
                // Destroyed queues drain their backlog as no-ops.
                ctx.counters
                    .shed_event_count
                    .fetch_add(1, Ordering::Relaxed);
            }
            SpoolEvent::Put { key, generation } => {
                handle_put(&ctx, &key, generation, &mut consecutive_errors).await;
            }
            SpoolEvent::Remove { key } => {
                let _guard = ctx.locks.write(&key).await;
                if let Err(e) = ctx.backend.remove(&key).await {
                    tracing::warn!(cache = %ctx.cache_name, key = %key, error = %e, "queued remove failed");
                    ctx.counters
                        .backend_error_count
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            SpoolEvent::RemoveAll => {
                if let Err(e) = ctx.backend.remove_all().await {
                    tracing::warn!(cache = %ctx.cache_name, error = %e, "queued remove_all failed");
                    ctx.counters
                        .backend_error_count
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    tracing::debug!(cache = %ctx.cache_name, "spool worker stopped");
}

/// Persist one staged item under its per-key write lock.
///
/// The fetch-and-validate contract: read the item, check the generation and
/// `spoolable`, and write only while holding the write lock, so a racing read
/// either sees the item and rescues it before we observe it, or waits until
/// our write is done and finds the purgatory slot empty.
async fn handle_put(ctx: &WorkerContext, key: &str, generation: u64, consecutive_errors: &mut u32) {
    let _guard = ctx.locks.write(key).await;

    let item = match ctx.purgatory.get(key) {
        Some(item) => item,
        None => {
            tracing::trace!(cache = %ctx.cache_name, key = %key, "stale put event, nothing staged");
            return;
        }
    };
    if item.generation() != generation {
        // The item this event was queued for has been replaced; the
        // overwrite's own event will take care of the live item.
        tracing::trace!(cache = %ctx.cache_name, key = %key, "put event superseded by overwrite");
        return;
    }
    if !item.spoolable {
        // Cancelled by a read. Not an error.
        tracing::debug!(cache = %ctx.cache_name, key = %key, "write cancelled by read");
        return;
    }

    match ctx.backend.put(&item.entry).await {
        Ok(()) => {
            *consecutive_errors = 0;
            ctx.purgatory.remove_if_generation(key, generation);
        }
        Err(e) => {
            ctx.counters
                .backend_error_count
                .fetch_add(1, Ordering::Relaxed);
            // The event is dropped either way; the staged item goes with it
            // so the purgatory cannot accumulate unwritable entries.
            ctx.purgatory.remove_if_generation(key, generation);

            if matches!(e, spillway_core::BackendError::Serialization { .. }) {
                // One unencodable entry does not degrade the tier.
                tracing::warn!(
                    cache = %ctx.cache_name,
                    key = %key,
                    error = %e,
                    "entry could not be encoded, event dropped"
                );
            } else if e.is_transient() {
                *consecutive_errors += 1;
                tracing::warn!(
                    cache = %ctx.cache_name,
                    key = %key,
                    error = %e,
                    consecutive = *consecutive_errors,
                    "backend put failed, event dropped"
                );
                if *consecutive_errors >= ctx.max_consecutive_errors {
                    tracing::error!(
                        cache = %ctx.cache_name,
                        threshold = ctx.max_consecutive_errors,
                        "repeated backend failures, destroying event queue"
                    );
                    ctx.destroyed.store(true, Ordering::Release);
                }
            } else {
                tracing::error!(
                    cache = %ctx.cache_name,
                    key = %key,
                    error = %e,
                    "fatal backend error, destroying event queue"
                );
                ctx.destroyed.store(true, Ordering::Release);
            }
        }
    }
}
