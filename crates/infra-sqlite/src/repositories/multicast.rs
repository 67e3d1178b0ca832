// Multicast / udpxy Repository

use crate::error::StorageError;
use crate::storage::Storage;
use chrono::NaiveDateTime;
use iptv_core::domain::{Multicast, UdpxyEndpoint};
use sqlx::Row;

#[derive(sqlx::FromRow)]
struct UdpxyRow {
    id: String,
    mid: i64,
    mcast: String,
    city: Option<String>,
    ip: String,
    port: i64,
    actv: Option<i64>,
    status: Option<i64>,
    time: Option<NaiveDateTime>,
}

impl TryFrom<UdpxyRow> for UdpxyEndpoint {
    type Error = StorageError;

    fn try_from(row: UdpxyRow) -> Result<Self, Self::Error> {
        let port = u16::try_from(row.port)
            .map_err(|_| StorageError::Decode(format!("udpxy {} has invalid port {}", row.id, row.port)))?;
        Ok(UdpxyEndpoint {
            id: row.id,
            mid: row.mid,
            mcast: row.mcast,
            city: row.city,
            ip: row.ip,
            port,
            actv: row.actv.unwrap_or(0),
            status: row.status.unwrap_or(0),
            time: row.time,
        })
    }
}

#[derive(Clone)]
pub struct MulticastRepository {
    storage: Storage,
}

impl MulticastRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Insert a multicast group and return its id (the `id` field is ignored)
    pub async fn insert(&self, group: &Multicast) -> Result<i64, StorageError> {
        let rows = self
            .storage
            .execute(
                "INSERT INTO iptv_multicast (country, province, isp, path, city, udpxy, lines, status) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
                &[
                    group.country.clone().into(),
                    group.province.clone().into(),
                    group.isp.clone().into(),
                    group.path.clone().into(),
                    group.city.clone().into(),
                    group.udpxy.clone().into(),
                    group.lines.into(),
                    group.status.into(),
                ],
                true,
            )
            .await?
            .unwrap_or_default();
        let row = rows
            .first()
            .ok_or_else(|| StorageError::Decode("INSERT ... RETURNING produced no row".into()))?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    /// Insert or replace a relay; `mid` must reference an existing multicast group
    pub async fn upsert_udpxy(&self, endpoint: &UdpxyEndpoint) -> Result<(), StorageError> {
        self.storage
            .execute(
                "INSERT INTO iptv_udpxy (id, mid, mcast, city, ip, port, actv, status, time) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET actv = excluded.actv, status = excluded.status, \
                 time = excluded.time, updated_at = CURRENT_TIMESTAMP",
                &[
                    endpoint.id.as_str().into(),
                    endpoint.mid.into(),
                    endpoint.mcast.as_str().into(),
                    endpoint.city.clone().into(),
                    endpoint.ip.as_str().into(),
                    endpoint.port.into(),
                    endpoint.actv.into(),
                    endpoint.status.into(),
                    endpoint.time.into(),
                ],
                false,
            )
            .await?;
        Ok(())
    }

    pub async fn list_udpxy(&self, mid: i64) -> Result<Vec<UdpxyEndpoint>, StorageError> {
        let rows: Vec<UdpxyRow> = self
            .storage
            .fetch_as(
                "SELECT id, mid, mcast, city, ip, port, actv, status, time FROM iptv_udpxy \
                 WHERE mid = ? ORDER BY id",
                &[mid.into()],
            )
            .await?;
        rows.into_iter().map(UdpxyEndpoint::try_from).collect()
    }
}
