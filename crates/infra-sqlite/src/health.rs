// Store health and maintenance

use crate::error::StorageError;
use crate::pool::PoolStats;
use crate::storage::Storage;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Snapshot returned by [`Storage::health_check`]
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub db_path: String,
    pub table_count: i64,
    pub channel_count: i64,
    pub hotel_count: i64,
    pub db_size_bytes: i64,
    pub db_size_mb: f64,
    pub pool: PoolStats,
    pub error: Option<String>,
    pub timestamp: NaiveDateTime,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

struct Counts {
    tables: i64,
    channels: i64,
    hotels: i64,
    size_bytes: i64,
}

impl Storage {
    /// Probe the store; failures are reported in the result, never returned
    pub async fn health_check(&self) -> HealthReport {
        let timestamp = chrono::Local::now().naive_local();
        let db_path = self.path().display().to_string();
        let pool = self.pool_stats();

        match self.collect_counts().await {
            Ok(counts) => HealthReport {
                status: HealthStatus::Healthy,
                db_path,
                table_count: counts.tables,
                channel_count: counts.channels,
                hotel_count: counts.hotels,
                db_size_bytes: counts.size_bytes,
                db_size_mb: bytes_to_mb(counts.size_bytes),
                pool,
                error: None,
                timestamp,
            },
            Err(e) => {
                warn!(error = %e, "Health check failed");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    db_path,
                    table_count: 0,
                    channel_count: 0,
                    hotel_count: 0,
                    db_size_bytes: 0,
                    db_size_mb: 0.0,
                    pool,
                    error: Some(e.to_string()),
                    timestamp,
                }
            }
        }
    }

    async fn collect_counts(&self) -> Result<Counts, StorageError> {
        Ok(Counts {
            tables: self
                .fetch_i64("SELECT COUNT(*) FROM sqlite_master WHERE type='table'", &[])
                .await?,
            channels: self.fetch_i64("SELECT COUNT(*) FROM iptv_channels", &[]).await?,
            hotels: self.fetch_i64("SELECT COUNT(*) FROM iptv_hotels", &[]).await?,
            size_bytes: self.db_size_bytes().await?,
        })
    }

    /// Database size from page_count * page_size
    pub async fn db_size_bytes(&self) -> Result<i64, StorageError> {
        let page_count = self.fetch_i64("PRAGMA page_count", &[]).await?;
        let page_size = self.fetch_i64("PRAGMA page_size", &[]).await?;
        Ok(page_count * page_size)
    }

    /// Rebuild the database file; returns reclaimed megabytes
    pub async fn vacuum(&self) -> Result<f64, StorageError> {
        info!("Running VACUUM to optimize database...");
        let before = bytes_to_mb(self.db_size_bytes().await?);
        self.execute("VACUUM", &[], false).await?;
        let after = bytes_to_mb(self.db_size_bytes().await?);
        let reclaimed = (before - after).max(0.0);

        info!(
            size_before_mb = before,
            size_after_mb = after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );
        Ok(reclaimed)
    }
}

fn bytes_to_mb(bytes: i64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use crate::pool::PoolConfig;
    use crate::storage::Storage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_health_check_reports_counts() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(PoolConfig::new(dir.path().join("h.db")).with_size(1))
            .await
            .unwrap();
        storage
            .execute(
                "INSERT INTO iptv_hotels (ip, port) VALUES (?, ?)",
                &["192.168.1.1".into(), 8000u16.into()],
                false,
            )
            .await
            .unwrap();

        let report = storage.health_check().await;
        assert!(report.is_healthy());
        assert_eq!(report.hotel_count, 1);
        assert_eq!(report.channel_count, 0);
        // 6 domain tables + schema_version + sqlite_sequence
        assert!(report.table_count >= 7);
        assert!(report.db_size_bytes > 0);
        assert_eq!(report.pool.size, 1);
    }

    #[tokio::test]
    async fn test_health_check_on_closed_pool_is_unhealthy() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(PoolConfig::new(dir.path().join("h.db")).with_size(1))
            .await
            .unwrap();
        storage.close().await;

        let report = storage.health_check().await;
        assert!(!report.is_healthy());
        assert!(report.error.unwrap().contains("closed"));
    }

    #[tokio::test]
    async fn test_vacuum_reports_non_negative_reclaim() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(PoolConfig::new(dir.path().join("v.db")).with_size(1))
            .await
            .unwrap();
        assert!(storage.vacuum().await.unwrap() >= 0.0);
    }
}
