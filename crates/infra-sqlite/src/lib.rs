// IPTV Harvest Infrastructure - SQLite Adapter
// Implements: connection pool, storage facade, migrations, repositories, TaskRunRecorder

mod error;
mod health;
mod migration;
mod pool;
mod repositories;
mod storage;

pub use error::{ConstraintKind, StorageError};
pub use health::{HealthReport, HealthStatus};
pub use migration::run_migrations;
pub use pool::{
    ConnectionPool, PoolConfig, PoolStats, PooledConnection, DEFAULT_ACQUIRE_TIMEOUT,
    DEFAULT_BUSY_TIMEOUT, DEFAULT_POOL_SIZE, MEMORY_PATH,
};
pub use repositories::{
    CategoryRepository, ChannelRepository, HotelRepository, MulticastRepository, NewChannel,
    NewHotel, SqliteTaskRunRecorder,
};
pub use storage::{SqlValue, Storage, TIMESTAMP_FORMAT};

pub use sqlx::sqlite::SqliteRow;
pub use sqlx::Row;
