//! Spillway Storage - Write-Back Staging Tier
//!
//! The staging tier sits behind a fast in-memory cache and persists evicted
//! or overflow entries to a pluggable durable backend. Callers are
//! acknowledged synchronously; persistence happens asynchronously, and an
//! entry re-read before it is written is rescued from the staging map and its
//! pending write withdrawn.
//!
//! The public entry point is [`SpoolCache`]; backends implement
//! [`SpoolBackend`]. The PostgreSQL reference backend lives in `spillway-pg`.

pub mod config;
pub mod facade;
pub mod locks;
pub mod memory;
pub mod purgatory;
pub mod queue;
pub mod traits;

pub use config::SpoolConfig;
pub use facade::{SpoolCache, SpoolStats};
pub use locks::{KeyLockRegistry, KeyReadGuard, KeyWriteGuard};
pub use memory::MemoryBackend;
pub use purgatory::{Purgatory, PurgatoryItem};
pub use queue::{EventQueue, SpoolEvent};
pub use traits::SpoolBackend;
