// Hotel Gateway Repository

use crate::error::StorageError;
use crate::storage::{SqlValue, Storage};
use chrono::NaiveDateTime;
use iptv_core::domain::Hotel;

#[derive(sqlx::FromRow)]
struct HotelRow {
    id: i64,
    ip: String,
    port: i64,
    name: Option<String>,
    count: Option<i64>,
    status: Option<i64>,
    time: Option<NaiveDateTime>,
}

impl TryFrom<HotelRow> for Hotel {
    type Error = StorageError;

    fn try_from(row: HotelRow) -> Result<Self, Self::Error> {
        let port = u16::try_from(row.port)
            .map_err(|_| StorageError::Decode(format!("hotel {} has invalid port {}", row.id, row.port)))?;
        Ok(Hotel {
            id: row.id,
            ip: row.ip,
            port,
            name: row.name,
            count: row.count.unwrap_or(0),
            status: row.status.unwrap_or(0),
            time: row.time,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewHotel {
    pub ip: String,
    pub port: u16,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct HotelRepository {
    storage: Storage,
}

impl HotelRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Insert gateways, ignoring known (ip, port) pairs; returns inserted count
    pub async fn insert_many(&self, hotels: &[NewHotel]) -> Result<u64, StorageError> {
        let params: Vec<Vec<SqlValue>> = hotels
            .iter()
            .map(|h| vec![h.ip.as_str().into(), h.port.into(), h.name.clone().into()])
            .collect();
        self.storage
            .execute_many(
                "INSERT OR IGNORE INTO iptv_hotels (ip, port, name) VALUES (?, ?, ?)",
                &params,
            )
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<Hotel>, StorageError> {
        let rows: Vec<HotelRow> = self
            .storage
            .fetch_as(
                "SELECT id, ip, port, name, count, status, time FROM iptv_hotels ORDER BY id",
                &[],
            )
            .await?;
        rows.into_iter().map(Hotel::try_from).collect()
    }

    /// Write reachability results as (hotel id, status) pairs
    pub async fn update_statuses(
        &self,
        statuses: &[(i64, i64)],
        checked_at: NaiveDateTime,
    ) -> Result<u64, StorageError> {
        let params: Vec<Vec<SqlValue>> = statuses
            .iter()
            .map(|(id, status)| vec![(*status).into(), checked_at.into(), (*id).into()])
            .collect();
        self.storage
            .execute_many(
                "UPDATE iptv_hotels SET status = ?, time = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                &params,
            )
            .await
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        self.storage.fetch_i64("SELECT COUNT(*) FROM iptv_hotels", &[]).await
    }

    pub async fn count_online(&self) -> Result<i64, StorageError> {
        self.storage
            .fetch_i64("SELECT COUNT(*) FROM iptv_hotels WHERE status = 1", &[])
            .await
    }
}
