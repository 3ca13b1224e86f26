//! Spillway PG - PostgreSQL Tabular Backend
//!
//! The reference durable store for the spillway tier: one row per
//! `(region, cache_key)` with scalar expiry columns, an insert-or-update
//! write path, and a background sweep that bulk-deletes expired rows.
//!
//! Connection pooling uses deadpool-postgres; the pool handle is injected
//! into [`PgTableBackend`], never registered globally.

pub mod config;
pub mod sweeper;
pub mod table;

pub use config::PgSpoolConfig;
pub use sweeper::{expiry_sweep_task, SweeperMetrics, SweeperSnapshot};
pub use table::{create_table_sql, PgTableBackend, PoolStatus};
