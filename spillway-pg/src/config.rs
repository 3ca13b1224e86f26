//! PostgreSQL backend configuration and connection pooling.

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use spillway_core::{BackendError, ConfigError};
use std::time::Duration;
use tokio_postgres::NoTls;

/// Configuration for [`PgTableBackend`](crate::PgTableBackend) and its
/// expiry sweeper.
#[derive(Debug, Clone)]
pub struct PgSpoolConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_active: usize,
    /// Table holding the cache rows
    pub table_name: String,
    /// Region label scoping this cache's rows within a shared table
    pub region: String,
    /// Check for an existing row before attempting the INSERT
    pub test_before_insert: bool,
    /// Whether `remove_all` actually clears the region; when false the call
    /// is logged and ignored, protecting shared-table deployments
    pub allow_remove_all: bool,
    /// Expiry sweep cadence
    pub sweep_interval: Duration,
}

impl Default for PgSpoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "spillway".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_active: 16,
            table_name: "spillway_store".to_string(),
            region: "default".to_string(),
            test_before_insert: true,
            allow_remove_all: true,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl PgSpoolConfig {
    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `SPILLWAY_DB_HOST`: PostgreSQL host (default: localhost)
    /// - `SPILLWAY_DB_PORT`: PostgreSQL port (default: 5432)
    /// - `SPILLWAY_DB_NAME`: database name (default: spillway)
    /// - `SPILLWAY_DB_USER`: database user (default: postgres)
    /// - `SPILLWAY_DB_PASSWORD`: database password (default: empty)
    /// - `SPILLWAY_DB_POOL_SIZE`: maximum pool size (default: 16)
    /// - `SPILLWAY_TABLE_NAME`: cache table (default: spillway_store)
    /// - `SPILLWAY_REGION`: region label (default: default)
    /// - `SPILLWAY_TEST_BEFORE_INSERT`: pre-check before INSERT (default: true)
    /// - `SPILLWAY_ALLOW_REMOVE_ALL`: honour remove_all (default: true)
    /// - `SPILLWAY_SWEEP_INTERVAL_SECS`: expiry sweep cadence (default: 300)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("SPILLWAY_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("SPILLWAY_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("SPILLWAY_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("SPILLWAY_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("SPILLWAY_DB_PASSWORD").unwrap_or(defaults.password),
            max_active: std::env::var("SPILLWAY_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_active),
            table_name: std::env::var("SPILLWAY_TABLE_NAME").unwrap_or(defaults.table_name),
            region: std::env::var("SPILLWAY_REGION").unwrap_or(defaults.region),
            test_before_insert: std::env::var("SPILLWAY_TEST_BEFORE_INSERT")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.test_before_insert),
            allow_remove_all: std::env::var("SPILLWAY_ALLOW_REMOVE_ALL")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.allow_remove_all),
            sweep_interval: Duration::from_secs(
                std::env::var("SPILLWAY_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.sweep_interval.as_secs()),
            ),
        }
    }

    /// Set the table name.
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Set the region label.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Enable or disable the pre-insert existence check.
    pub fn with_test_before_insert(mut self, enabled: bool) -> Self {
        self.test_before_insert = enabled;
        self
    }

    /// Enable or disable `remove_all`.
    pub fn with_allow_remove_all(mut self, allowed: bool) -> Self {
        self.allow_remove_all = allowed;
        self
    }

    /// Set the expiry sweep cadence.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Validate fields that are interpolated into SQL rather than bound.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` when `table_name` is not a plain SQL
    /// identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_sql_identifier(&self.table_name) {
            return Err(ConfigError::InvalidValue {
                field: "table_name".to_string(),
                value: self.table_name.clone(),
                reason: "must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
            });
        }
        Ok(())
    }

    /// Create a connection pool from this configuration.
    ///
    /// The pool is lazy; no connection is attempted until first use.
    pub fn create_pool(&self) -> Result<Pool, BackendError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.max_active));

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| BackendError::Connection {
                reason: format!("failed to create pool: {}", e),
            })
    }
}

/// Whether `s` is a plain SQL identifier safe to interpolate.
pub(crate) fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PgSpoolConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.table_name, "spillway_store");
        assert_eq!(config.region, "default");
        assert!(config.test_before_insert);
        assert!(config.allow_remove_all);
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_config_builders() {
        let config = PgSpoolConfig::default()
            .with_table_name("shared_cache")
            .with_region("sessions")
            .with_test_before_insert(false)
            .with_allow_remove_all(false)
            .with_sweep_interval(Duration::from_secs(60));
        assert_eq!(config.table_name, "shared_cache");
        assert_eq!(config.region, "sessions");
        assert!(!config.test_before_insert);
        assert!(!config.allow_remove_all);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_bad_table_name() {
        let config = PgSpoolConfig::default().with_table_name("bad-name; drop table x");
        assert!(config.validate().is_err());

        let config = PgSpoolConfig::default().with_table_name("1starts_with_digit");
        assert!(config.validate().is_err());

        let config = PgSpoolConfig::default().with_table_name("");
        assert!(config.validate().is_err());

        let config = PgSpoolConfig::default().with_table_name("good_table_2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sql_identifier() {
        assert!(is_sql_identifier("spillway_store"));
        assert!(is_sql_identifier("_private"));
        assert!(is_sql_identifier("T1"));
        assert!(!is_sql_identifier("with space"));
        assert!(!is_sql_identifier("quote\"d"));
        assert!(!is_sql_identifier("semi;colon"));
    }
}
