//! Expiry Sweep Background Task
//!
//! Non-eternal rows past their `expire_time_s` are bulk-deleted on a fixed
//! cadence. The sweep belongs to the tabular backend, not to the cache
//! facade: a shared table may be swept by a single process while many
//! regions write to it.
//!
//! The task runs until the shutdown signal is received and returns its
//! metrics so the caller can log or export totals.

use crate::table::PgTableBackend;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Metrics for expiry sweep operations.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Total sweep cycles completed since startup
    pub cycles: AtomicU64,
    /// Total rows deleted since startup
    pub rows_deleted: AtomicU64,
    /// Total errors encountered while sweeping
    pub errors: AtomicU64,
}

impl SweeperMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a current snapshot of all metrics.
    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            rows_deleted: self.rows_deleted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone)]
pub struct SweeperSnapshot {
    pub cycles: u64,
    pub rows_deleted: u64,
    pub errors: u64,
}

/// Background task that periodically deletes expired rows.
///
/// # Arguments
///
/// * `backend` - The tabular backend whose region is swept
/// * `sweep_interval` - Cadence between sweeps
/// * `shutdown_rx` - Watch receiver for the shutdown signal
///
/// # Returns
///
/// Metrics collected during the task's lifetime
///
/// # Example
///
/// ```ignore
/// use tokio::sync::watch;
///
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(expiry_sweep_task(
///     backend.clone(),
///     config.sweep_interval,
///     shutdown_rx,
/// ));
///
/// // Later, trigger shutdown and collect totals.
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await.unwrap();
/// ```
pub async fn expiry_sweep_task(
    backend: Arc<PgTableBackend>,
    sweep_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweeperMetrics> {
    let metrics = Arc::new(SweeperMetrics::new());

    let mut sweep_tick = interval(sweep_interval);
    sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of a tokio interval fires immediately; consume it so
    // the first real sweep happens one cadence after startup.
    sweep_tick.tick().await;

    tracing::info!(
        region = %backend.region(),
        sweep_interval_secs = sweep_interval.as_secs(),
        "expiry sweep task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!(region = %backend.region(), "expiry sweep task shutting down");
                    break;
                }
            }

            _ = sweep_tick.tick() => {
                sweep_once(&backend, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        region = %backend.region(),
        cycles = snapshot.cycles,
        rows_deleted = snapshot.rows_deleted,
        errors = snapshot.errors,
        "expiry sweep task completed"
    );

    metrics
}

/// Perform one sweep cycle.
async fn sweep_once(backend: &PgTableBackend, metrics: &SweeperMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    match backend.delete_expired().await {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!(region = %backend.region(), deleted, "swept expired rows");
                metrics.rows_deleted.fetch_add(deleted, Ordering::Relaxed);
            } else {
                tracing::trace!(region = %backend.region(), "sweep cycle found nothing expired");
            }
        }
        Err(e) => {
            tracing::error!(region = %backend.region(), error = %e, "expiry sweep failed");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PgSpoolConfig;
    use spillway_core::JsonCodec;

    #[test]
    fn test_metrics_new() {
        let metrics = SweeperMetrics::new();
        assert_eq!(metrics.cycles.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.rows_deleted.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.errors.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = SweeperMetrics::new();
        metrics.cycles.store(4, Ordering::Relaxed);
        metrics.rows_deleted.store(17, Ordering::Relaxed);
        metrics.errors.store(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 4);
        assert_eq!(snapshot.rows_deleted, 17);
        assert_eq!(snapshot.errors, 1);
    }

    #[tokio::test]
    async fn test_task_exits_on_shutdown_before_first_sweep() {
        let config = PgSpoolConfig::default().with_sweep_interval(Duration::from_secs(3600));
        let backend = Arc::new(
            PgTableBackend::from_config(&config, Arc::new(JsonCodec))
                .expect("backend construction should succeed"),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(expiry_sweep_task(
            backend,
            config.sweep_interval,
            shutdown_rx,
        ));

        shutdown_tx.send(true).expect("shutdown send should succeed");
        let metrics = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task should stop promptly")
            .expect("task should not panic");

        // Shut down before the first cadence elapsed; the lazy pool was
        // never asked for a connection.
        assert_eq!(metrics.snapshot().cycles, 0);
        assert_eq!(metrics.snapshot().errors, 0);
    }
}
