// Channel / Source Domain Models
//
// Plain records mirroring the store schema. Validation rules that need no I/O
// (playable resolution, probe outcome) live here so services and repositories agree.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Minimum width for a channel to be published in generated playlists
pub const MIN_PUBLISHED_WIDTH: i64 = 1280;

/// Live channel discovered by a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Category name this channel is grouped under
    pub channel_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame: Option<f64>,
    pub speed: f64,
    pub sign: i64,
    pub time: Option<NaiveDateTime>,
}

impl Channel {
    /// True once a probe has recorded stream metadata
    pub fn is_probed(&self) -> bool {
        self.width.is_some()
    }

    /// Eligible for playlist output: measured throughput and at least HD width
    pub fn is_publishable(&self) -> bool {
        self.speed > 0.0 && self.width.unwrap_or(0) >= MIN_PUBLISHED_WIDTH
    }
}

/// Outcome of probing one channel, written back in bulk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProbe {
    pub channel_id: i64,
    pub width: i64,
    pub height: i64,
    pub frame: f64,
    pub speed: f64,
}

impl ChannelProbe {
    /// A failed probe is stored as all zeros so the channel is not re-probed forever
    pub fn failed(channel_id: i64) -> Self {
        Self {
            channel_id,
            width: 0,
            height: 0,
            frame: 0.0,
            speed: 0.0,
        }
    }
}

/// Hotel IPTV gateway (ip:port exposing a channel list)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: i64,
    pub ip: String,
    pub port: u16,
    pub name: Option<String>,
    pub count: i64,
    pub status: i64,
    pub time: Option<NaiveDateTime>,
}

impl Hotel {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Multicast source group (province / ISP bundle)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multicast {
    pub id: i64,
    pub country: Option<String>,
    pub province: Option<String>,
    pub isp: Option<String>,
    pub path: Option<String>,
    pub city: Option<String>,
    pub udpxy: Option<String>,
    pub lines: i64,
    pub status: i64,
    pub time: Option<NaiveDateTime>,
}

/// udpxy relay discovered for a multicast group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpxyEndpoint {
    /// Collector-assigned key (ip:port:mcast)
    pub id: String,
    pub mid: i64,
    pub mcast: String,
    pub city: Option<String>,
    pub ip: String,
    pub port: u16,
    pub actv: i64,
    pub status: i64,
    pub time: Option<NaiveDateTime>,
}

/// Playlist category ("genre")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub psw: String,
    pub category_type: String,
    pub enable: bool,
}

/// Persisted scheduler bookkeeping row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub name: String,
    pub last_run: Option<NaiveDateTime>,
    pub next_run: Option<NaiveDateTime>,
    pub status: String,
    pub result: Option<String>,
}
