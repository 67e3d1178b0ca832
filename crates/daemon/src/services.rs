// Domain services run by the CLI and the scheduled jobs

use crate::context::AppContext;
use chrono::NaiveDateTime;
use iptv_core::domain::{Category, Channel, ChannelProbe};
use iptv_infra_sqlite::{HealthReport, StorageError};
use iptv_infra_system::{BatchOutcome, Engine, EngineError, ProbeError};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Genre of the trailing timestamp section
pub const UPDATE_TIME_GENRE: &str = "更新时间";

/// Placeholder stream under the timestamp entry
pub const UPDATE_TIME_URL: &str = "https://taoiptv.com/time.mp4";

pub const EPG_URL: &str = "https://live.fanmingming.com/e.xml";
pub const LOGO_BASE_URL: &str = "https://live.fanmingming.com/tv/";

const TXT_FILE: &str = "iptv.txt";
const M3U_FILE: &str = "iptv.m3u";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeedCheckReport {
    pub candidates: usize,
    pub playable: usize,
    pub failed: usize,
    pub stored: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HotelReport {
    pub checked: usize,
    pub online: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistReport {
    pub channels: usize,
    pub sections: usize,
    pub txt_path: Option<PathBuf>,
    pub m3u_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub total_channels: i64,
    pub publishable_channels: i64,
    pub by_type: Vec<(String, i64)>,
    pub hotels: i64,
    pub hotels_online: i64,
}

/// Probe every channel that has no resolution yet
///
/// Unplayable channels are stored with zeroed results so they are not probed
/// again. Results are written in transactions of `probe.batch_size`.
pub async fn check_channel_speeds(
    ctx: &AppContext,
    engine: &Arc<Engine>,
    limit: Option<i64>,
) -> Result<SpeedCheckReport, ServiceError> {
    let probe = ctx.stream_probe();
    if !probe.is_available(engine).await {
        return Err(ServiceError::Unavailable("ffprobe/ffmpeg not found on PATH".into()));
    }

    let channels = ctx.channels.list_unprobed(limit).await?;
    let candidates = channels.len();
    if candidates == 0 {
        info!("No channels need speed processing");
        return Ok(SpeedCheckReport {
            candidates: 0,
            playable: 0,
            failed: 0,
            stored: 0,
        });
    }
    info!(candidates, "Starting channel speed check");

    let worker = Arc::clone(engine);
    let outcome = engine
        .run_tasks(
            channels,
            move |channel: Channel| {
                let engine = Arc::clone(&worker);
                let probe = probe.clone();
                async move {
                    let result = probe_channel(&engine, &probe, &channel).await;
                    Ok::<_, ProbeError>(Some(result))
                }
            },
            None,
        )
        .await;

    let probes = outcome.into_results();
    let playable = probes.iter().filter(|p| p.speed > 0.0).count();
    let stored = store_probe_results(ctx, engine, probes, ctx.clock.now()).await;

    let report = SpeedCheckReport {
        candidates,
        playable,
        failed: candidates - playable,
        stored,
    };
    info!(?report, "Channel speed check finished");
    Ok(report)
}

async fn probe_channel(
    engine: &Engine,
    probe: &iptv_infra_system::StreamProbe,
    channel: &Channel,
) -> ChannelProbe {
    let info = match probe.probe_video(engine, &channel.url).await {
        Ok(info) => info,
        Err(e) => {
            tracing::debug!(channel = %channel.name, url = %channel.url, error = %e, "Probe failed");
            return ChannelProbe::failed(channel.id);
        }
    };
    let speed = probe.measure_speed(engine, &channel.url).await.unwrap_or(0.0);
    ChannelProbe {
        channel_id: channel.id,
        width: info.width,
        height: info.height,
        frame: info.frame,
        speed,
    }
}

async fn store_probe_results(
    ctx: &AppContext,
    engine: &Engine,
    probes: Vec<ChannelProbe>,
    probed_at: NaiveDateTime,
) -> usize {
    let repo = &ctx.channels;
    let outcome: BatchOutcome<ChannelProbe> = engine
        .run_batched(probes, ctx.config.probe.batch_size, |chunk| async move {
            repo.update_probe_results(&chunk, probed_at)
                .await
                .map(|_| chunk)
        })
        .await;
    if outcome.failed > 0 {
        warn!(failed = outcome.failed, "Some probe results could not be stored");
    }
    outcome.succeeded
}

/// TCP-probe every known hotel gateway and store online/offline status
pub async fn validate_hotels(ctx: &AppContext, engine: &Arc<Engine>) -> Result<HotelReport, ServiceError> {
    let hotels = ctx.hotels.list_all().await?;
    let port_probe = ctx.port_probe();
    info!(hotels = hotels.len(), "Starting hotel validation");

    let outcome = engine
        .run_tasks(
            hotels,
            move |hotel: iptv_core::domain::Hotel| async move {
                let online = port_probe.check(&hotel.ip, hotel.port).await;
                Ok::<_, ServiceError>(Some((hotel.id, i64::from(online))))
            },
            None,
        )
        .await;

    let statuses = outcome.into_results();
    let online = statuses.iter().filter(|(_, status)| *status == 1).count();
    ctx.hotels.update_statuses(&statuses, ctx.clock.now()).await?;

    let report = HotelReport {
        checked: statuses.len(),
        online,
    };
    info!(checked = report.checked, online, "Hotel validation finished");
    Ok(report)
}

/// One `genre,#genre#` block of the TXT playlist
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSection {
    pub genre: String,
    pub entries: Vec<(String, String)>,
}

/// Build sections for enabled categories from publishable channels
///
/// Each category type becomes one section (first occurrence wins); entries are
/// deduplicated by (name, url).
pub fn build_sections(categories: &[Category], channels: &[Channel]) -> Vec<PlaylistSection> {
    let mut seen_types = HashSet::new();
    categories
        .iter()
        .filter(|category| seen_types.insert(category.category_type.as_str()))
        .map(|category| {
            let mut seen = HashSet::new();
            let entries = channels
                .iter()
                .filter(|c| c.channel_type == category.category_type && c.is_publishable())
                .filter(|c| seen.insert((c.name.as_str(), c.url.as_str())))
                .map(|c| (c.name.clone(), c.url.clone()))
                .collect();
            PlaylistSection {
                genre: category.category_type.clone(),
                entries,
            }
        })
        .collect()
}

/// Render the TXT playlist, ending with the update-time section
pub fn render_txt(sections: &[PlaylistSection], updated_at: NaiveDateTime) -> String {
    let mut out = String::new();
    for section in sections {
        out.push_str(&format!("{},#genre#\n", section.genre));
        for (name, url) in &section.entries {
            out.push_str(&format!("{name},{url}\n"));
        }
    }
    out.push_str(&format!(
        "{UPDATE_TIME_GENRE},#genre#\n{},{UPDATE_TIME_URL}\n",
        updated_at.format("%Y-%m-%d %H:%M:%S")
    ));
    out
}

/// Convert a TXT playlist to extended M3U
pub fn txt_to_m3u(txt: &str) -> String {
    let mut out = format!("#EXTM3U x-tvg-url=\"{EPG_URL}\"\n");
    let mut group: Option<&str> = None;

    for line in txt.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(genre) = line.strip_suffix(",#genre#") {
            group = Some(genre.trim());
            continue;
        }
        let Some((name, url)) = line.split_once(',') else {
            continue;
        };
        out.push_str(&format!(
            "#EXTINF:-1 tvg-name=\"{name}\" tvg-logo=\"{LOGO_BASE_URL}{name}.png\""
        ));
        if let Some(group) = group {
            out.push_str(&format!(" group-title=\"{group}\""));
        }
        out.push_str(&format!(",{name}\n{url}\n"));
    }
    out
}

/// Write iptv.txt and iptv.m3u into the output directory
pub async fn generate_playlists(ctx: &AppContext) -> Result<PlaylistReport, ServiceError> {
    let categories = ctx.categories.enabled().await?;
    if categories.is_empty() {
        warn!("No enabled categories, nothing to generate");
        return Ok(PlaylistReport {
            channels: 0,
            sections: 0,
            txt_path: None,
            m3u_path: None,
        });
    }

    let channels = ctx.channels.list_publishable().await?;
    let sections = build_sections(&categories, &channels);
    let count: usize = sections.iter().map(|s| s.entries.len()).sum();

    let txt = render_txt(&sections, ctx.clock.now());
    let m3u = txt_to_m3u(&txt);

    let dir = Path::new(&ctx.config.output_dir);
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ServiceError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    let txt_path = write_file(dir.join(TXT_FILE), txt).await?;
    let m3u_path = write_file(dir.join(M3U_FILE), m3u).await?;

    info!(channels = count, sections = sections.len(), path = %txt_path.display(), "Playlists generated");
    Ok(PlaylistReport {
        channels: count,
        sections: sections.len(),
        txt_path: Some(txt_path),
        m3u_path: Some(m3u_path),
    })
}

async fn write_file(path: PathBuf, content: String) -> Result<PathBuf, ServiceError> {
    match tokio::fs::write(&path, content).await {
        Ok(()) => Ok(path),
        Err(source) => Err(ServiceError::Write { path, source }),
    }
}

/// Delete channels carrying `sign`
pub async fn cleanup_channels(ctx: &AppContext, sign: i64) -> Result<u64, ServiceError> {
    let deleted = ctx.channels.delete_by_sign(sign).await?;
    info!(deleted, sign, "Cleaned up invalid channels");
    Ok(deleted)
}

pub async fn collect_stats(ctx: &AppContext) -> Result<StatsReport, ServiceError> {
    Ok(StatsReport {
        total_channels: ctx.channels.count().await?,
        publishable_channels: ctx.channels.count_publishable().await?,
        by_type: ctx.channels.count_by_type().await?,
        hotels: ctx.hotels.count().await?,
        hotels_online: ctx.hotels.count_online().await?,
    })
}

/// VACUUM the store and report its health afterwards
pub async fn maintain_store(ctx: &AppContext) -> Result<(f64, HealthReport), ServiceError> {
    let reclaimed_mb = ctx.storage.vacuum().await?;
    let invalidated = ctx.category_cache.invalidate(None);
    let health = ctx.storage.health_check().await;
    info!(reclaimed_mb, invalidated, healthy = health.is_healthy(), "Store maintenance finished");
    Ok((reclaimed_mb, health))
}
