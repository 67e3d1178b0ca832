// Built-in scheduled jobs

use crate::config::SchedulerSettings;
use crate::context::AppContext;
use crate::services::{self, ServiceError};
use async_trait::async_trait;
use iptv_core::port::{Job, JobError};
use iptv_infra_system::Engine;
use std::sync::Weak;

/// Every workload the daemon schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    HotelValidate,
    ChannelSpeedCheck,
    GenerateIptvFiles,
    CleanupInvalidChannels,
    StoreMaintenance,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::HotelValidate,
        JobKind::ChannelSpeedCheck,
        JobKind::GenerateIptvFiles,
        JobKind::CleanupInvalidChannels,
        JobKind::StoreMaintenance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::HotelValidate => "hotel_validate",
            JobKind::ChannelSpeedCheck => "channel_speed_check",
            JobKind::GenerateIptvFiles => "generate_iptv_files",
            JobKind::CleanupInvalidChannels => "cleanup_invalid_channels",
            JobKind::StoreMaintenance => "store_maintenance",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Schedule string derived from the configured hours
    pub fn schedule(&self, settings: &SchedulerSettings) -> String {
        match self {
            JobKind::HotelValidate => format!("daily@{}", settings.hotel_validate_hour),
            JobKind::ChannelSpeedCheck => format!("daily@{}", settings.speed_check_hour),
            JobKind::GenerateIptvFiles => format!("daily@{}", settings.generate_hour),
            JobKind::CleanupInvalidChannels => format!("daily@{}", settings.cleanup_hour),
            // Sunday
            JobKind::StoreMaintenance => format!("weekly@6@{}", settings.cleanup_hour),
        }
    }

    /// Run the workload once and summarize the outcome
    pub async fn execute(&self, ctx: &AppContext) -> Result<String, ServiceError> {
        match self {
            JobKind::HotelValidate => {
                let report = Engine::scope(ctx.concurrency.clone(), |engine| async move {
                    services::validate_hotels(ctx, &engine).await
                })
                .await??;
                Ok(format!("{} of {} hotels online", report.online, report.checked))
            }
            JobKind::ChannelSpeedCheck => {
                let report = Engine::scope(ctx.concurrency.clone(), |engine| async move {
                    services::check_channel_speeds(ctx, &engine, None).await
                })
                .await??;
                Ok(format!(
                    "{} channels probed, {} playable",
                    report.candidates, report.playable
                ))
            }
            JobKind::GenerateIptvFiles => {
                let report = services::generate_playlists(ctx).await?;
                Ok(format!(
                    "{} channels in {} sections",
                    report.channels, report.sections
                ))
            }
            JobKind::CleanupInvalidChannels => {
                let deleted = services::cleanup_channels(ctx, 0).await?;
                Ok(format!("{deleted} invalid channels removed"))
            }
            JobKind::StoreMaintenance => {
                let (reclaimed_mb, health) = services::maintain_store(ctx).await?;
                Ok(format!(
                    "reclaimed {reclaimed_mb:.2} MB, store {}",
                    if health.is_healthy() { "healthy" } else { "unhealthy" }
                ))
            }
        }
    }
}

/// Scheduler adapter for a [`JobKind`]
///
/// Holds the context weakly: the context owns the scheduler that owns this job.
pub struct ScheduledJob {
    kind: JobKind,
    ctx: Weak<AppContext>,
}

impl ScheduledJob {
    pub fn new(kind: JobKind, ctx: Weak<AppContext>) -> Self {
        Self { kind, ctx }
    }
}

#[async_trait]
impl Job for ScheduledJob {
    async fn run(&self) -> Result<String, JobError> {
        let ctx = self
            .ctx
            .upgrade()
            .ok_or_else(|| JobError::Unavailable("application context dropped".into()))?;
        self.kind.execute(&ctx).await.map_err(|e| match e {
            ServiceError::Unavailable(reason) => JobError::Unavailable(reason),
            other => JobError::failed(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_names_round_trip_and_schedules() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(JobKind::from_name("scrape_everything"), None);

        let settings = SchedulerSettings::default();
        assert_eq!(JobKind::ChannelSpeedCheck.schedule(&settings), "daily@6");
        assert_eq!(JobKind::StoreMaintenance.schedule(&settings), "weekly@6@0");
        for kind in JobKind::ALL {
            assert!(kind.schedule(&settings).parse::<iptv_core::domain::Schedule>().is_ok());
        }
    }

    #[tokio::test]
    async fn test_cleanup_job_against_store() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir).await;
        ctx.storage
            .execute(
                "INSERT INTO iptv_channels (name, url, type, sign) VALUES ('A', 'http://a', 't', 0), ('B', 'http://b', 't', 1)",
                &[],
                false,
            )
            .await
            .unwrap();

        let job = ScheduledJob::new(JobKind::CleanupInvalidChannels, Arc::downgrade(&ctx));
        let summary = assert_ok!(job.run().await);
        assert_eq!(summary, "1 invalid channels removed");
        assert_eq!(ctx.channels.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_generate_job_without_categories_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir).await;
        let summary = JobKind::GenerateIptvFiles.execute(&ctx).await.unwrap();
        assert_eq!(summary, "0 channels in 0 sections");
        assert!(!dir.path().join("out").join("iptv.txt").exists());
    }

    #[tokio::test]
    async fn test_generate_job_writes_playlists() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir).await;
        ctx.categories.insert("CCTV1", "", "央视频道", true).await.unwrap();
        ctx.storage
            .execute(
                "INSERT INTO iptv_channels (name, url, type, width, height, frame, speed) \
                 VALUES ('CCTV1', 'http://a/1', '央视频道', 1920, 1080, 25.0, 2.5)",
                &[],
                false,
            )
            .await
            .unwrap();

        let summary = JobKind::GenerateIptvFiles.execute(&ctx).await.unwrap();
        assert_eq!(summary, "1 channels in 1 sections");

        let txt = std::fs::read_to_string(dir.path().join("out").join("iptv.txt")).unwrap();
        assert!(txt.starts_with("央视频道,#genre#\nCCTV1,http://a/1\n"));
        let m3u = std::fs::read_to_string(dir.path().join("out").join("iptv.m3u")).unwrap();
        assert!(m3u.contains("group-title=\"央视频道\",CCTV1\nhttp://a/1"));
    }

    #[tokio::test]
    async fn test_dropped_context_is_unavailable() {
        let job = ScheduledJob::new(JobKind::HotelValidate, Weak::new());
        let err = assert_err!(job.run().await);
        assert!(matches!(err, JobError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_hotel_validation_marks_status() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        ctx.hotels
            .insert_many(&[
                iptv_infra_sqlite::NewHotel {
                    ip: "127.0.0.1".into(),
                    port: open_port,
                    name: None,
                },
                iptv_infra_sqlite::NewHotel {
                    ip: "127.0.0.1".into(),
                    port: 9,
                    name: None,
                },
            ])
            .await
            .unwrap();

        let summary = JobKind::HotelValidate.execute(&ctx).await.unwrap();
        assert_eq!(summary, "1 of 2 hotels online");
        assert_eq!(ctx.hotels.count_online().await.unwrap(), 1);
    }
}
