//! PostgreSQL row-store backend.
//!
//! One row per `(region, cache_key)` pair:
//!
//! ```sql
//! CREATE TABLE spillway_store (
//!     region        VARCHAR NOT NULL,
//!     cache_key     VARCHAR NOT NULL,
//!     element       BYTEA,
//!     create_time   TIMESTAMPTZ,
//!     create_time_s BIGINT,
//!     max_life_s    BIGINT,
//!     expire_time_s BIGINT,
//!     eternal       CHAR(1),
//!     PRIMARY KEY (region, cache_key)
//! );
//! ```
//!
//! `expire_time_s` is `now + max_life_s` at write time, so the sweeper and
//! the read path use a single scalar comparison instead of arithmetic over
//! create time. An index on `(region, expire_time_s)` keeps sweeps cheap on
//! large tables.

use crate::config::PgSpoolConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use spillway_core::{
    BackendError, CacheEntry, EntryCodec, SpillwayResult, NAME_COMPONENT_DELIMITER,
};
use spillway_storage::SpoolBackend;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_postgres::error::SqlState;

/// SQL creating the cache table.
pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n\
         \x20   region        VARCHAR NOT NULL,\n\
         \x20   cache_key     VARCHAR NOT NULL,\n\
         \x20   element       BYTEA,\n\
         \x20   create_time   TIMESTAMPTZ,\n\
         \x20   create_time_s BIGINT,\n\
         \x20   max_life_s    BIGINT,\n\
         \x20   expire_time_s BIGINT,\n\
         \x20   eternal       CHAR(1),\n\
         \x20   PRIMARY KEY (region, cache_key)\n\
         )"
    )
}

/// Connection-pool gauges for the stats surface.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Configured maximum pool size.
    pub max_size: usize,
    /// Connections currently managed by the pool.
    pub size: usize,
    /// Idle connections available without waiting.
    pub available: usize,
}

/// Tabular [`SpoolBackend`] over a shared PostgreSQL table.
///
/// The pool handle is injected; nothing is registered in process-global
/// state. Multiple regions may share one table and one pool.
pub struct PgTableBackend {
    pool: Pool,
    table: String,
    region: String,
    codec: Arc<dyn EntryCodec>,
    test_before_insert: bool,
    allow_remove_all: bool,
}

impl PgTableBackend {
    /// Create a backend over an existing pool.
    ///
    /// # Errors
    ///
    /// Configuration errors when the table name is not a plain SQL
    /// identifier (it is interpolated into statements, not bound).
    pub fn new(
        pool: Pool,
        codec: Arc<dyn EntryCodec>,
        config: &PgSpoolConfig,
    ) -> SpillwayResult<Self> {
        config.validate()?;
        Ok(Self {
            pool,
            table: config.table_name.clone(),
            region: config.region.clone(),
            codec,
            test_before_insert: config.test_before_insert,
            allow_remove_all: config.allow_remove_all,
        })
    }

    /// Create a backend and its pool from configuration.
    pub fn from_config(config: &PgSpoolConfig, codec: Arc<dyn EntryCodec>) -> SpillwayResult<Self> {
        let pool = config.create_pool()?;
        Self::new(pool, codec, config)
    }

    /// Region label of this backend.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Create the cache table and its expiry index if they do not exist.
    pub async fn ensure_table(&self) -> Result<(), BackendError> {
        let client = self.client().await?;
        client
            .batch_execute(&create_table_sql(&self.table))
            .await
            .map_err(query_error)?;
        let index_sql = format!(
            "CREATE INDEX IF NOT EXISTS {table}_expire_idx ON {table} (region, expire_time_s)",
            table = self.table
        );
        client.batch_execute(&index_sql).await.map_err(query_error)?;
        Ok(())
    }

    /// Pool gauges for observability.
    pub fn pool_status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
        }
    }

    /// Delete non-eternal rows past their expiry. Returns rows deleted.
    ///
    /// Invoked by the expiry sweeper on its cadence; callable directly for a
    /// one-off sweep.
    pub async fn delete_expired(&self) -> Result<u64, BackendError> {
        let client = self.client().await?;
        let now_s = Utc::now().timestamp();
        let sql = format!(
            "DELETE FROM {} WHERE region = $1 AND eternal = 'F' AND expire_time_s < $2",
            self.table
        );
        client
            .execute(sql.as_str(), &[&self.region, &now_s])
            .await
            .map_err(query_error)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, BackendError> {
        self.pool.get().await.map_err(|e| BackendError::Connection {
            reason: e.to_string(),
        })
    }

    async fn row_exists(
        &self,
        client: &deadpool_postgres::Object,
        key: &str,
    ) -> Result<bool, BackendError> {
        // Select only the key; existence is all we need and this keeps the
        // pre-check cheap.
        let sql = format!(
            "SELECT cache_key FROM {} WHERE region = $1 AND cache_key = $2",
            self.table
        );
        let row = client
            .query_opt(sql.as_str(), &[&self.region, &key])
            .await
            .map_err(query_error)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl SpoolBackend for PgTableBackend {
    async fn put(&self, entry: &CacheEntry) -> Result<(), BackendError> {
        let blob = self.codec.encode(entry)?;
        let client = self.client().await?;

        let now = Utc::now();
        let now_s = now.timestamp();
        let expire_time_s = now_s + entry.attributes.max_life_s as i64;
        let max_life_s = entry.attributes.max_life_s as i64;
        let create_time: DateTime<Utc> =
            DateTime::from_timestamp_millis(entry.attributes.create_time_ms as i64).unwrap_or(now);
        let eternal = if entry.attributes.is_eternal { "T" } else { "F" };

        let mut exists = false;
        if self.test_before_insert {
            exists = self.row_exists(&client, &entry.key).await?;
        }

        if !exists {
            let sql = format!(
                "INSERT INTO {} (region, cache_key, element, max_life_s, eternal, \
                 create_time, create_time_s, expire_time_s) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                self.table
            );
            match client
                .execute(
                    sql.as_str(),
                    &[
                        &self.region,
                        &entry.key,
                        &blob,
                        &max_life_s,
                        &eternal,
                        &create_time,
                        &now_s,
                        &expire_time_s,
                    ],
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if is_unique_violation(&e) => {
                    // Lost the insert race; fall through to the update.
                    exists = true;
                }
                Err(e) => return Err(query_error(e)),
            }
        }

        if exists {
            let sql = format!(
                "UPDATE {} SET element = $1, create_time = $2, create_time_s = $3, \
                 expire_time_s = $4 WHERE region = $5 AND cache_key = $6",
                self.table
            );
            client
                .execute(
                    sql.as_str(),
                    &[
                        &blob,
                        &create_time,
                        &now_s,
                        &expire_time_s,
                        &self.region,
                        &entry.key,
                    ],
                )
                .await
                .map_err(query_error)?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, BackendError> {
        let client = self.client().await?;
        let now_s = Utc::now().timestamp();
        let sql = format!(
            "SELECT element FROM {} WHERE region = $1 AND cache_key = $2 \
             AND (eternal = 'T' OR expire_time_s >= $3)",
            self.table
        );
        let row = client
            .query_opt(sql.as_str(), &[&self.region, &key, &now_s])
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let blob: Vec<u8> = row.get(0);
        match self.codec.decode(&blob) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // A corrupt row reads as absent rather than poisoning the
                // caller; the sweeper or an overwrite will retire it.
                tracing::error!(
                    region = %self.region,
                    key = %key,
                    error = %e,
                    "stored element could not be decoded"
                );
                Ok(None)
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, BackendError> {
        let client = self.client().await?;
        let deleted = if is_group_key(key) {
            // A trailing delimiter names a whole group; widen to a prefix
            // delete over its members.
            let pattern = like_prefix_pattern(key);
            let sql = format!(
                "DELETE FROM {} WHERE region = $1 AND cache_key LIKE $2",
                self.table
            );
            client
                .execute(sql.as_str(), &[&self.region, &pattern])
                .await
                .map_err(query_error)?
        } else {
            let sql = format!(
                "DELETE FROM {} WHERE region = $1 AND cache_key = $2",
                self.table
            );
            client
                .execute(sql.as_str(), &[&self.region, &key])
                .await
                .map_err(query_error)?
        };
        Ok(deleted > 0)
    }

    async fn remove_all(&self) -> Result<(), BackendError> {
        if !self.allow_remove_all {
            tracing::info!(
                region = %self.region,
                "remove_all requested but allow_remove_all is false, ignoring"
            );
            return Ok(());
        }
        let client = self.client().await?;
        let sql = format!("DELETE FROM {} WHERE region = $1", self.table);
        client
            .execute(sql.as_str(), &[&self.region])
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn size(&self) -> Result<u64, BackendError> {
        let client = self.client().await?;
        let sql = format!("SELECT count(*) FROM {} WHERE region = $1", self.table);
        let row = client
            .query_one(sql.as_str(), &[&self.region])
            .await
            .map_err(query_error)?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn group_keys(&self, _group: &str) -> Result<HashSet<String>, BackendError> {
        Err(BackendError::Unsupported {
            operation: "group_keys".to_string(),
        })
    }

    async fn dispose(&self) {
        tracing::debug!(region = %self.region, "closing connection pool");
        self.pool.close();
    }
}

/// Whether a key names a whole group (trailing name-component delimiter).
pub(crate) fn is_group_key(key: &str) -> bool {
    key.ends_with(NAME_COMPONENT_DELIMITER)
}

/// Escape LIKE metacharacters in `prefix` and append the wildcard.
pub(crate) fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn query_error(e: tokio_postgres::Error) -> BackendError {
    BackendError::Query {
        reason: e.to_string(),
    }
}

/// Detect an insert that lost to an existing row.
///
/// SQLSTATE 23505 is the portable signal; the message fallback covers
/// foreign dialects spoken through the same wire protocol.
fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return true;
    }
    message_indicates_duplicate(&e.to_string())
}

fn message_indicates_duplicate(text: &str) -> bool {
    text.contains("Violation of unique index") || text.contains("Duplicate entry")
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::JsonCodec;

    #[test]
    fn test_create_table_sql_shape() {
        let sql = create_table_sql("spillway_store");
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS spillway_store"));
        assert!(sql.contains("PRIMARY KEY (region, cache_key)"));
        assert!(sql.contains("expire_time_s BIGINT"));
        assert!(sql.contains("eternal       CHAR(1)"));
    }

    #[test]
    fn test_group_key_detection() {
        assert!(is_group_key("sessions:"));
        assert!(!is_group_key("sessions:42"));
        assert!(!is_group_key("plain"));
        assert!(!is_group_key(""));
    }

    #[test]
    fn test_like_prefix_pattern_escapes_metacharacters() {
        assert_eq!(like_prefix_pattern("sessions:"), "sessions:%");
        assert_eq!(like_prefix_pattern("a_b:"), "a\\_b:%");
        assert_eq!(like_prefix_pattern("a%b:"), "a\\%b:%");
        assert_eq!(like_prefix_pattern("a\\b:"), "a\\\\b:%");
    }

    #[test]
    fn test_duplicate_message_detection() {
        assert!(message_indicates_duplicate(
            "ERROR: Violation of unique index SYS_IDX_12"
        ));
        assert!(message_indicates_duplicate(
            "Duplicate entry 'k' for key 'PRIMARY'"
        ));
        assert!(!message_indicates_duplicate("syntax error at or near"));
    }

    #[tokio::test]
    async fn test_constructor_rejects_invalid_table_name() {
        let config = PgSpoolConfig::default().with_table_name("bad table");
        let pool = PgSpoolConfig::default()
            .create_pool()
            .expect("lazy pool creation should succeed");
        let result = PgTableBackend::new(pool, Arc::new(JsonCodec), &config);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_constructor_accepts_valid_config() {
        let config = PgSpoolConfig::default().with_region("prices");
        let pool = config.create_pool().expect("lazy pool creation should succeed");
        let backend = PgTableBackend::new(pool, Arc::new(JsonCodec), &config)
            .expect("backend construction should succeed");
        assert_eq!(backend.region(), "prices");

        let status = backend.pool_status();
        assert_eq!(status.size, 0, "lazy pool should not have connected");
        assert_eq!(status.max_size, config.max_active);
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// The generated pattern always ends with an unescaped wildcard
            /// and matches its own prefix literally.
            #[test]
            fn prop_like_pattern_ends_with_wildcard(prefix in "[a-z_%\\\\]{0,12}:") {
                let pattern = like_prefix_pattern(&prefix);
                prop_assert!(pattern.ends_with('%'));
                // Everything before the trailing wildcard decodes back to
                // the original prefix.
                let body = &pattern[..pattern.len() - 1];
                let mut decoded = String::new();
                let mut chars = body.chars();
                while let Some(c) = chars.next() {
                    if c == '\\' {
                        let escaped = chars.next();
                        prop_assert!(escaped.is_some());
                        decoded.push(escaped.expect("checked above"));
                    } else {
                        decoded.push(c);
                    }
                }
                prop_assert_eq!(decoded, prefix);
            }
        }
    }
}
