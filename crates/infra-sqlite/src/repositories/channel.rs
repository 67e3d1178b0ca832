// Channel Repository

use crate::error::StorageError;
use crate::storage::{SqlValue, Storage};
use chrono::NaiveDateTime;
use iptv_core::domain::channel::MIN_PUBLISHED_WIDTH;
use iptv_core::domain::{Channel, ChannelProbe};
use tracing::info;

const CHANNEL_COLUMNS: &str = "id, name, url, type, width, height, frame, speed, sign, time";

/// Playable and at least MIN_PUBLISHED_WIDTH wide (bound as the only parameter)
const PUBLISHABLE: &str = "speed > 0 AND width >= ?";

#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: i64,
    name: String,
    url: String,
    #[sqlx(rename = "type")]
    channel_type: String,
    width: Option<i64>,
    height: Option<i64>,
    frame: Option<f64>,
    speed: Option<f64>,
    sign: Option<i64>,
    time: Option<NaiveDateTime>,
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            id: row.id,
            name: row.name,
            url: row.url,
            channel_type: row.channel_type,
            width: row.width,
            height: row.height,
            frame: row.frame,
            speed: row.speed.unwrap_or(0.0),
            sign: row.sign.unwrap_or(0),
            time: row.time,
        }
    }
}

/// Channel awaiting insertion
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub name: String,
    pub url: String,
    pub channel_type: String,
    pub sign: i64,
}

#[derive(Clone)]
pub struct ChannelRepository {
    storage: Storage,
}

impl ChannelRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Insert channels, ignoring URLs that already exist; returns inserted count
    pub async fn insert_many(&self, channels: &[NewChannel]) -> Result<u64, StorageError> {
        let params: Vec<Vec<SqlValue>> = channels
            .iter()
            .map(|c| {
                vec![
                    c.name.as_str().into(),
                    c.url.as_str().into(),
                    c.channel_type.as_str().into(),
                    c.sign.into(),
                ]
            })
            .collect();
        self.storage
            .execute_many(
                "INSERT OR IGNORE INTO iptv_channels (name, url, type, sign) VALUES (?, ?, ?, ?)",
                &params,
            )
            .await
    }

    /// Channels never probed (no width recorded yet)
    pub async fn list_unprobed(&self, limit: Option<i64>) -> Result<Vec<Channel>, StorageError> {
        let query = format!(
            "SELECT {CHANNEL_COLUMNS} FROM iptv_channels WHERE width IS NULL ORDER BY id LIMIT ?"
        );
        let rows: Vec<ChannelRow> = self
            .storage
            .fetch_as(&query, &[limit.unwrap_or(-1).into()])
            .await?;
        Ok(rows.into_iter().map(Channel::from).collect())
    }

    /// Channels eligible for playlist output, grouped by type then name
    pub async fn list_publishable(&self) -> Result<Vec<Channel>, StorageError> {
        let query = format!(
            "SELECT {CHANNEL_COLUMNS} FROM iptv_channels \
             WHERE {PUBLISHABLE} ORDER BY type, name, speed DESC"
        );
        let rows: Vec<ChannelRow> = self
            .storage
            .fetch_as(&query, &[MIN_PUBLISHED_WIDTH.into()])
            .await?;
        Ok(rows.into_iter().map(Channel::from).collect())
    }

    pub async fn list_by_type(&self, channel_type: &str) -> Result<Vec<Channel>, StorageError> {
        let query = format!("SELECT {CHANNEL_COLUMNS} FROM iptv_channels WHERE type = ? ORDER BY name");
        let rows: Vec<ChannelRow> = self.storage.fetch_as(&query, &[channel_type.into()]).await?;
        Ok(rows.into_iter().map(Channel::from).collect())
    }

    /// Write probe outcomes in one transaction
    pub async fn update_probe_results(
        &self,
        probes: &[ChannelProbe],
        probed_at: NaiveDateTime,
    ) -> Result<u64, StorageError> {
        let params: Vec<Vec<SqlValue>> = probes
            .iter()
            .map(|p| {
                vec![
                    p.width.into(),
                    p.height.into(),
                    p.frame.into(),
                    p.speed.into(),
                    probed_at.into(),
                    p.channel_id.into(),
                ]
            })
            .collect();
        let updated = self
            .storage
            .execute_many(
                "UPDATE iptv_channels SET width = ?, height = ?, frame = ?, speed = ?, time = ?, \
                 updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                &params,
            )
            .await?;
        info!(updated, "Channel probe results stored");
        Ok(updated)
    }

    pub async fn delete_by_sign(&self, sign: i64) -> Result<u64, StorageError> {
        self.storage
            .execute_affected("DELETE FROM iptv_channels WHERE sign = ?", &[sign.into()])
            .await
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        self.storage
            .fetch_i64("SELECT COUNT(*) FROM iptv_channels", &[])
            .await
    }

    pub async fn count_publishable(&self) -> Result<i64, StorageError> {
        self.storage
            .fetch_i64(
                &format!("SELECT COUNT(*) FROM iptv_channels WHERE {PUBLISHABLE}"),
                &[MIN_PUBLISHED_WIDTH.into()],
            )
            .await
    }

    /// (type, count) pairs ordered by type
    pub async fn count_by_type(&self) -> Result<Vec<(String, i64)>, StorageError> {
        self.storage
            .fetch_as(
                "SELECT type, COUNT(*) AS total FROM iptv_channels GROUP BY type ORDER BY type",
                &[],
            )
            .await
    }
}
