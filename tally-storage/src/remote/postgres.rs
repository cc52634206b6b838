//! PostgreSQL record store.
//!
//! Connection pooling uses deadpool-postgres. The table layout is:
//!
//! ```sql
//! CREATE TABLE periodic_results (
//!     user_id    TEXT PRIMARY KEY,
//!     period_key TEXT NOT NULL,
//!     payload    JSONB NOT NULL,
//!     cached_at  TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! The table name comes from configuration and is validated as a plain
//! identifier before it is ever spliced into SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tally_core::{ConfigError, RemoteStoreConfig, StorageError, UserId};
use tokio_postgres::NoTls;

use super::{RemoteRecord, RemoteRecordStore};

// ============================================================================
// CONNECTION POOL
// ============================================================================

/// Create a connection pool from configuration.
pub fn create_pool(config: &RemoteStoreConfig) -> Result<Pool, StorageError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.dbname.clone());
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.connect_timeout = Some(config.timeout);
    cfg.pool = Some(PoolConfig::new(config.max_size));

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| StorageError::Unavailable {
            reason: format!("Failed to create pool: {}", e),
        })
}

// ============================================================================
// SQL
// ============================================================================

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         user_id TEXT PRIMARY KEY, \
         period_key TEXT NOT NULL, \
         payload JSONB NOT NULL, \
         cached_at TIMESTAMPTZ NOT NULL)"
    )
}

fn select_sql(table: &str) -> String {
    format!("SELECT user_id, period_key, payload, cached_at FROM {table} WHERE user_id = $1")
}

fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (user_id, period_key, payload, cached_at) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (user_id) DO UPDATE SET \
         period_key = EXCLUDED.period_key, \
         payload = EXCLUDED.payload, \
         cached_at = EXCLUDED.cached_at"
    )
}

fn query_error(e: tokio_postgres::Error) -> StorageError {
    StorageError::Query {
        reason: e.to_string(),
    }
}

// ============================================================================
// STORE
// ============================================================================

/// The remote store tier as deployed: typed reads over a Postgres table.
pub type PostgresStoreTier = super::RemoteStoreTier<PostgresRecordStore>;

/// Remote record store backed by a PostgreSQL table.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: Pool,
    table: String,
}

impl std::fmt::Debug for PostgresRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRecordStore")
            .field("table", &self.table)
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

impl PostgresRecordStore {
    /// Wrap an existing pool. `table` must be a plain SQL identifier.
    pub fn new(pool: Pool, table: impl Into<String>) -> Result<Self, ConfigError> {
        let table = table.into();
        if !tally_core::config::is_sql_identifier(&table) {
            return Err(ConfigError::InvalidValue {
                field: "table".to_string(),
                value: table,
                reason: "must be a plain SQL identifier".to_string(),
            });
        }
        Ok(Self { pool, table })
    }

    /// Validate the configuration and build a pool from it.
    pub fn from_config(config: &RemoteStoreConfig) -> tally_core::TallyResult<Self> {
        config.validate()?;
        let pool = create_pool(config)?;
        Ok(Self::new(pool, config.table.clone())?)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn get_conn(&self) -> Result<deadpool_postgres::Object, StorageError> {
        self.pool.get().await.map_err(|e| StorageError::Unavailable {
            reason: e.to_string(),
        })
    }

    /// Create the results table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let conn = self.get_conn().await?;
        conn.batch_execute(&create_table_sql(&self.table))
            .await
            .map_err(query_error)?;
        tracing::debug!(table = %self.table, "Ensured remote results table");
        Ok(())
    }
}

#[async_trait]
impl RemoteRecordStore for PostgresRecordStore {
    async fn fetch_record(&self, user_id: &UserId) -> Result<Option<RemoteRecord>, StorageError> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(&select_sql(&self.table), &[&user_id.as_str()])
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let cached_at: DateTime<Utc> = row.try_get("cached_at").map_err(query_error)?;
        Ok(Some(RemoteRecord {
            user_id: row.try_get("user_id").map_err(query_error)?,
            period_key: row.try_get("period_key").map_err(query_error)?,
            payload: row.try_get("payload").map_err(query_error)?,
            cached_at,
        }))
    }

    async fn upsert_record(&self, record: &RemoteRecord) -> Result<(), StorageError> {
        let conn = self.get_conn().await?;
        conn.execute(
            &upsert_sql(&self.table),
            &[
                &record.user_id,
                &record.period_key,
                &record.payload,
                &record.cached_at,
            ],
        )
        .await
        .map_err(query_error)?;
        Ok(())
    }
}
