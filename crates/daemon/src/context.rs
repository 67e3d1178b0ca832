// Application context: the composition root shared by CLI commands and jobs

use crate::config::AppConfig;
use crate::jobs::{JobKind, ScheduledJob};
use anyhow::{Context, Result};
use iptv_core::application::{BoundedCache, SchedulerSlot, TaskScheduler};
use iptv_core::domain::Category;
use iptv_core::port::{Clock, SystemClock};
use iptv_infra_sqlite::{
    CategoryRepository, ChannelRepository, HotelRepository, PoolConfig, SqliteTaskRunRecorder, Storage,
};
use iptv_infra_system::{ConcurrencyConfig, PortProbe, ProxyChecker, StreamProbe};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct AppContext {
    pub config: AppConfig,
    pub storage: Storage,
    pub channels: ChannelRepository,
    pub categories: CategoryRepository,
    pub hotels: HotelRepository,
    pub task_runs: SqliteTaskRunRecorder,
    pub category_cache: Arc<BoundedCache<Vec<Category>>>,
    pub concurrency: ConcurrencyConfig,
    pub scheduler: SchedulerSlot,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    /// Open the store (running migrations) and wire repositories
    pub async fn open(config: AppConfig) -> Result<Arc<Self>> {
        let pool_config = PoolConfig::new(config.database.path.as_str())
            .with_size(config.database.pool_size)
            .with_acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs));
        let storage = Storage::open(pool_config)
            .await
            .with_context(|| format!("failed to open database {}", config.database.path))?;

        let category_cache = Arc::new(BoundedCache::new(
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_secs),
        ));

        info!(db_path = %config.database.path, "Application context ready");
        Ok(Arc::new(Self {
            channels: ChannelRepository::new(storage.clone()),
            categories: CategoryRepository::new(storage.clone(), Arc::clone(&category_cache)),
            hotels: HotelRepository::new(storage.clone()),
            task_runs: SqliteTaskRunRecorder::new(storage.clone()),
            concurrency: config.concurrency(),
            scheduler: SchedulerSlot::new(),
            clock: Arc::new(SystemClock),
            category_cache,
            storage,
            config,
        }))
    }

    pub fn stream_probe(&self) -> StreamProbe {
        let probe = &self.config.probe;
        StreamProbe::new(probe.ffprobe.clone(), probe.ffmpeg.clone())
            .with_probe_timeout(Duration::from_secs(probe.probe_timeout_secs))
            .with_speed_sample(probe.speed_sample_secs)
    }

    pub fn port_probe(&self) -> PortProbe {
        PortProbe::new(Duration::from_secs(self.config.probe.port_timeout_secs))
    }

    pub fn proxy_checker(&self, target_url: Option<String>) -> ProxyChecker {
        let proxy = &self.config.proxy;
        ProxyChecker::new(
            target_url.unwrap_or_else(|| proxy.target_url.clone()),
            Duration::from_secs(proxy.timeout),
            Duration::from_secs(proxy.test_duration),
            proxy.max_concurrent,
        )
    }

    /// Build a scheduler with every built-in job and install it in the slot
    ///
    /// Any previously installed scheduler is stopped first. The new one is
    /// not started.
    pub async fn init_scheduler(self: &Arc<Self>) -> Arc<TaskScheduler> {
        let scheduler = TaskScheduler::builder(Arc::clone(&self.clock))
            .poll_interval(Duration::from_secs(self.config.scheduler.poll_interval_secs))
            .recorder(Arc::new(self.task_runs.clone()))
            .build();

        for kind in JobKind::ALL {
            let job = ScheduledJob::new(kind, Arc::downgrade(self));
            scheduler
                .add_task(kind.name(), Arc::new(job), &kind.schedule(&self.config.scheduler))
                .await;
        }
        self.scheduler.init(scheduler).await
    }

    /// Stop the scheduler, wait briefly for running jobs and close the store
    pub async fn shutdown(&self, drain_timeout: Duration) {
        if let Some(scheduler) = self.scheduler.current().await {
            scheduler.stop().await;
            scheduler.drain(drain_timeout).await;
        }
        self.scheduler.shutdown().await;
        self.storage.close().await;
        info!("Application context closed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn test_context(dir: &TempDir) -> Arc<AppContext> {
        let mut config = AppConfig::default();
        config.database.path = dir.path().join("iptv.db").display().to_string();
        config.database.pool_size = 2;
        config.output_dir = dir.path().join("out").display().to_string();
        config.log.dir = None;
        AppContext::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_init_scheduler_registers_builtin_jobs() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir).await;

        let scheduler = ctx.init_scheduler().await;
        let names: Vec<String> = scheduler.list_tasks().into_iter().map(|t| t.name).collect();
        assert_eq!(names.len(), JobKind::ALL.len());
        assert!(names.contains(&"channel_speed_check".to_string()));
        assert!(!scheduler.is_running());

        // Registration is persisted through the recorder
        let runs = ctx.task_runs.list().await.unwrap();
        assert_eq!(runs.len(), JobKind::ALL.len());
        assert!(runs.iter().all(|r| r.status == "pending"));

        ctx.shutdown(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_reinit_replaces_scheduler() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir).await;

        let first = ctx.init_scheduler().await;
        first.start().await;
        let second = ctx.init_scheduler().await;

        assert!(!first.is_running());
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&ctx.scheduler.current().await.unwrap(), &second));
        ctx.shutdown(Duration::from_millis(100)).await;
    }
}
