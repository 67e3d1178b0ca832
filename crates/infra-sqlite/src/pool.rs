// SQLite Connection Pool
//
// Fixed set of connections lent out under a bounded wait. When the wait
// expires the caller gets an overflow connection instead of an error; overflow
// connections never enter the fixed slots and are closed on release.

use crate::error::StorageError;
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Default number of fixed connections
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Default bounded wait before falling back to an overflow connection
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default SQLite busy timeout
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Special path selecting a private in-memory database per connection
pub const MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub path: PathBuf,
    pub size: usize,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
}

impl PoolConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: DEFAULT_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions, StorageError> {
        let base = if self.path.as_os_str() == MEMORY_PATH {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        Ok(base
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout)
            .foreign_keys(true)
            .pragma("cache_size", "-64000")
            .pragma("temp_store", "MEMORY"))
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub overflow_outstanding: usize,
    pub total_created: usize,
    pub closed: bool,
}

struct PoolInner {
    options: SqliteConnectOptions,
    path: PathBuf,
    size: usize,
    acquire_timeout: Duration,
    idle: Mutex<Vec<SqliteConnection>>,
    /// One permit per free fixed slot
    available: Semaphore,
    in_use: AtomicUsize,
    overflow_outstanding: AtomicUsize,
    total_created: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    async fn open_connection(&self) -> Result<SqliteConnection, StorageError> {
        let conn = self
            .options
            .connect()
            .await
            .map_err(|e| StorageError::Connect(format!("{}: {e}", self.path.display())))?;
        let created = self.total_created.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(path = %self.path.display(), total_created = created, "Opened SQLite connection");
        Ok(conn)
    }

    fn release(&self, conn: SqliteConnection, overflow: bool) {
        if overflow {
            self.overflow_outstanding.fetch_sub(1, Ordering::SeqCst);
            drop(conn);
            debug!("Overflow connection closed");
            return;
        }

        self.in_use.fetch_sub(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            drop(conn);
            return;
        }

        let mut idle = self.idle.lock();
        if idle.len() < self.size {
            idle.push(conn);
            drop(idle);
            self.available.add_permits(1);
        } else {
            drop(idle);
            drop(conn);
        }
    }

    fn discard(&self, conn: SqliteConnection, overflow: bool) {
        drop(conn);
        if overflow {
            self.overflow_outstanding.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        // The slot is refilled lazily by the next acquire
        if !self.closed.load(Ordering::SeqCst) {
            self.available.add_permits(1);
        }
    }
}

/// Bounded SQLite connection pool
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Open `config.size` connections, creating the database file and its
    /// parent directory if missing
    pub async fn open(config: PoolConfig) -> Result<Self, StorageError> {
        if config.path.as_os_str() != MEMORY_PATH {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StorageError::Connect(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }

        let size = config.size.max(1);
        let inner = PoolInner {
            options: config.connect_options()?,
            path: config.path.clone(),
            size,
            acquire_timeout: config.acquire_timeout,
            idle: Mutex::new(Vec::with_capacity(size)),
            available: Semaphore::new(0),
            in_use: AtomicUsize::new(0),
            overflow_outstanding: AtomicUsize::new(0),
            total_created: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };

        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            conns.push(inner.open_connection().await?);
        }
        inner.idle.lock().extend(conns);
        inner.available.add_permits(size);

        info!(path = %config.path.display(), size, "Connection pool opened");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Borrow a connection, waiting up to the acquire timeout for a free slot
    ///
    /// Never fails because the pool is busy: after the wait an overflow
    /// connection is opened instead.
    pub async fn acquire(&self) -> Result<PooledConnection, StorageError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(StorageError::PoolClosed);
        }

        match tokio::time::timeout(inner.acquire_timeout, inner.available.acquire()).await {
            Ok(Ok(permit)) => {
                let pooled = inner.idle.lock().pop();
                let conn = match pooled {
                    Some(conn) => conn,
                    // Slot emptied by a discard; the permit returns if this fails
                    None => inner.open_connection().await?,
                };
                permit.forget();
                inner.in_use.fetch_add(1, Ordering::SeqCst);
                Ok(PooledConnection {
                    conn: Some(conn),
                    overflow: false,
                    pool: Arc::clone(inner),
                })
            }
            Ok(Err(_)) => Err(StorageError::PoolClosed),
            Err(_) => {
                warn!(
                    timeout_ms = inner.acquire_timeout.as_millis() as u64,
                    pool_size = inner.size,
                    "Connection pool exhausted, opening overflow connection"
                );
                let conn = inner.open_connection().await?;
                inner.overflow_outstanding.fetch_add(1, Ordering::SeqCst);
                Ok(PooledConnection {
                    conn: Some(conn),
                    overflow: true,
                    pool: Arc::clone(inner),
                })
            }
        }
    }

    /// Close every idle connection; later acquires fail with `PoolClosed`
    ///
    /// Call once at shutdown after callers have stopped issuing work.
    /// Connections still lent out are closed when their guards drop.
    pub async fn close_all(&self) -> usize {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.inner.available.close();
        let drained: Vec<SqliteConnection> = std::mem::take(&mut *self.inner.idle.lock());
        let count = drained.len();
        for conn in drained {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Error closing pooled connection");
            }
        }
        info!(closed = count, "Connection pool closed");
        count
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            size: inner.size,
            idle: inner.idle.lock().len(),
            in_use: inner.in_use.load(Ordering::SeqCst),
            overflow_outstanding: inner.overflow_outstanding.load(Ordering::SeqCst),
            total_created: inner.total_created.load(Ordering::SeqCst),
            closed: inner.closed.load(Ordering::SeqCst),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

/// Exclusive handle to one connection; returned to the pool on drop
pub struct PooledConnection {
    conn: Option<SqliteConnection>,
    overflow: bool,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    /// Drop a connection believed broken instead of returning it
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(overflow = self.overflow, "Discarding pooled connection");
            self.pool.discard(conn, self.overflow);
        }
    }
}

impl Deref for PooledConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_pool(dir: &TempDir, size: usize) -> ConnectionPool {
        let config = PoolConfig::new(dir.path().join("nested/iptv.db"))
            .with_size(size)
            .with_acquire_timeout(Duration::from_millis(50));
        ConnectionPool::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_parent_dir_and_connections() {
        let dir = TempDir::new().unwrap();
        let pool = open_pool(&dir, 3).await;

        assert!(dir.path().join("nested/iptv.db").exists());
        let stats = pool.stats();
        assert_eq!(stats.idle, 3);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total_created, 3);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_overflow_which_is_not_pooled() {
        let dir = TempDir::new().unwrap();
        let pool = open_pool(&dir, 2).await;

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert!(!a.is_overflow() && !b.is_overflow());
        assert_eq!(pool.stats().in_use, 2);

        let extra = pool.acquire().await.unwrap();
        assert!(extra.is_overflow());
        assert_eq!(pool.stats().overflow_outstanding, 1);
        assert_eq!(pool.stats().in_use, 2);

        drop(extra);
        let stats = pool.stats();
        assert_eq!(stats.overflow_outstanding, 0);
        assert_eq!(stats.idle, 0);

        drop(a);
        drop(b);
        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.total_created, 3);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection_instead_of_overflow() {
        let dir = TempDir::new().unwrap();
        let config = PoolConfig::new(dir.path().join("iptv.db"))
            .with_size(1)
            .with_acquire_timeout(Duration::from_secs(5));
        let pool = ConnectionPool::open(config).await.unwrap();

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.unwrap().is_overflow() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(!waiter.await.unwrap());
        assert_eq!(pool.stats().total_created, 1);
    }

    #[tokio::test]
    async fn test_guard_returns_connection_when_holder_panics() {
        let dir = TempDir::new().unwrap();
        let pool = open_pool(&dir, 1).await;

        let pool2 = pool.clone();
        let result = tokio::spawn(async move {
            let _conn = pool2.acquire().await.unwrap();
            panic!("holder crashed");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(pool.stats().idle, 1);
        assert!(!pool.acquire().await.unwrap().is_overflow());
    }

    #[tokio::test]
    async fn test_discarded_slot_is_refilled_lazily() {
        let dir = TempDir::new().unwrap();
        let pool = open_pool(&dir, 1).await;

        pool.acquire().await.unwrap().discard();
        assert_eq!(pool.stats().idle, 0);

        let conn = pool.acquire().await.unwrap();
        assert!(!conn.is_overflow());
        assert_eq!(pool.stats().total_created, 2);
    }

    #[tokio::test]
    async fn test_close_all_then_acquire_fails() {
        let dir = TempDir::new().unwrap();
        let pool = open_pool(&dir, 2).await;
        let held = pool.acquire().await.unwrap();

        assert_eq!(pool.close_all().await, 1);
        assert!(matches!(pool.acquire().await, Err(StorageError::PoolClosed)));

        drop(held);
        let stats = pool.stats();
        assert!(stats.closed);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.in_use, 0);
        assert_eq!(pool.close_all().await, 0);
    }
}
