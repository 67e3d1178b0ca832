// Storage Facade
//
// Every call borrows exactly one pooled connection and returns it on all exit
// paths through the guard's Drop. Statement failures are logged with the
// offending SQL and surfaced as StorageError; nothing here retries.

use crate::error::StorageError;
use crate::migration::run_migrations;
use crate::pool::{ConnectionPool, PoolConfig, PoolStats};
use chrono::NaiveDateTime;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Connection, FromRow, Row};
use std::path::Path;
use tracing::{debug, error, info};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Timestamp format used for TIMESTAMP columns written by this crate
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Dynamically typed statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<u16> for SqlValue {
    fn from(v: u16) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Text(v.format(TIMESTAMP_FORMAT).to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &'q [SqlValue]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Blob(v) => query.bind(v.as_slice()),
        };
    }
    query
}

/// Pooled, migrated SQLite store
#[derive(Clone)]
pub struct Storage {
    pool: ConnectionPool,
}

impl Storage {
    /// Open the pool and bring the schema up to date
    pub async fn open(config: PoolConfig) -> Result<Self, StorageError> {
        let pool = ConnectionPool::open(config).await?;
        {
            let mut conn = pool.acquire().await?;
            run_migrations(&mut conn).await?;
        }
        info!(path = %pool.path().display(), "Storage ready");
        Ok(Self { pool })
    }

    /// Run one statement
    ///
    /// Returns `Some(rows)` when `fetch` is set, otherwise executes in
    /// autocommit mode and returns `None`.
    ///
    /// # Example
    /// ```text
    /// let rows = storage
    ///     .execute("SELECT id, name FROM iptv_channels WHERE type = ?", &["央视频道".into()], true)
    ///     .await?
    ///     .unwrap_or_default();
    /// ```
    pub async fn execute(
        &self,
        query: &str,
        params: &[SqlValue],
        fetch: bool,
    ) -> Result<Option<Vec<SqliteRow>>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let statement = bind_all(sqlx::query(query), params);

        if fetch {
            let rows = statement
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| log_failure(query, e))?;
            debug!(rows = rows.len(), "Query fetched");
            Ok(Some(rows))
        } else {
            statement
                .execute(&mut *conn)
                .await
                .map_err(|e| log_failure(query, e))?;
            Ok(None)
        }
    }

    /// Run one write statement and return the affected row count
    pub async fn execute_affected(&self, query: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let result = bind_all(sqlx::query(query), params)
            .execute(&mut *conn)
            .await
            .map_err(|e| log_failure(query, e))?;
        Ok(result.rows_affected())
    }

    /// Fetch the first column of the first row as an integer (`COUNT(*)` etc.)
    pub async fn fetch_i64(&self, query: &str, params: &[SqlValue]) -> Result<i64, StorageError> {
        let rows = self.execute(query, params, true).await?.unwrap_or_default();
        match rows.first() {
            Some(row) => Ok(row.try_get::<i64, _>(0)?),
            None => Ok(0),
        }
    }

    /// Fetch rows and map each through `FromRow`
    pub async fn fetch_as<T>(&self, query: &str, params: &[SqlValue]) -> Result<Vec<T>, StorageError>
    where
        T: for<'r> FromRow<'r, SqliteRow>,
    {
        let rows = self.execute(query, params, true).await?.unwrap_or_default();
        rows.iter()
            .map(T::from_row)
            .collect::<Result<Vec<T>, sqlx::Error>>()
            .map_err(StorageError::from)
    }

    /// Run the same statement once per parameter set inside one transaction
    ///
    /// Either every row is applied or, on the first failure, none are.
    pub async fn execute_many(
        &self,
        query: &str,
        params_list: &[Vec<SqlValue>],
    ) -> Result<u64, StorageError> {
        if params_list.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let mut affected = 0;
        for params in params_list {
            let result = bind_all(sqlx::query(query), params)
                .execute(&mut *tx)
                .await
                .map_err(|e| log_failure(query, e))?;
            affected += result.rows_affected();
        }
        tx.commit().await?;

        debug!(statements = params_list.len(), affected, "Batch committed");
        Ok(affected)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    /// Close idle connections; call once after all work has stopped
    pub async fn close(&self) {
        self.pool.close_all().await;
    }
}

fn log_failure(query: &str, err: sqlx::Error) -> StorageError {
    let err = StorageError::from(err);
    error!(query = %query, error = %err, "Statement failed");
    err
}
