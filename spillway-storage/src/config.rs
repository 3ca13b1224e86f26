//! Facade configuration.

use std::time::Duration;

/// Configuration for a [`SpoolCache`](crate::SpoolCache).
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Bound of the event queue. Appends beyond this block up to
    /// `append_timeout`, then the event is shed.
    pub queue_capacity: usize,
    /// How long an `update` may block on queue backpressure before the event
    /// is shed. The tier is auxiliary; shedding is preferable to stalling the
    /// caller's update path.
    pub append_timeout: Duration,
    /// Consecutive transient backend failures tolerated by the worker before
    /// the queue transitions to the destroyed state.
    pub max_consecutive_errors: u32,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            append_timeout: Duration::from_millis(100),
            max_consecutive_errors: 5,
        }
    }
}

impl SpoolConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event queue bound.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the backpressure timeout for queue appends.
    pub fn with_append_timeout(mut self, timeout: Duration) -> Self {
        self.append_timeout = timeout;
        self
    }

    /// Set the fatal-error threshold for the queue worker.
    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }
}
