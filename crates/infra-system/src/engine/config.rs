// Concurrency limits for the execution engine

use std::time::Duration;

/// Upper bound on blocking worker threads
pub const MAX_WORKERS: usize = 32;

/// Upper bound on concurrent network operations
pub const MAX_CONCURRENCY_CEILING: usize = 800;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Engine sizing
///
/// `max_workers` sizes the OS-thread pool for blocking calls;
/// `concurrency_ceiling` is the number of gate permits shared by every
/// concurrent unit started through the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyConfig {
    pub max_workers: usize,
    pub concurrency_ceiling: usize,
    pub batch_size: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Token-bucket limit applied to every fetch attempt; `None` disables it
    pub requests_per_second: Option<u32>,
    pub user_agent: String,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            max_workers: (cpus * 4).min(MAX_WORKERS),
            concurrency_ceiling: (cpus * 100).min(MAX_CONCURRENCY_CEILING),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            requests_per_second: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ConcurrencyConfig {
    /// Derive a config from scraper limits
    ///
    /// Worker threads are a tenth of the network ceiling, clamped to
    /// `1..=MAX_WORKERS`.
    ///
    /// # Arguments
    /// * `concurrency_limit` - Network gate permits
    /// * `timeout` - Total per-request timeout
    /// * `max_retries` - Total fetch attempts
    /// * `retry_delay` - Linear backoff unit
    pub fn from_limits(
        concurrency_limit: usize,
        timeout: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        let ceiling = concurrency_limit.max(1);
        Self {
            max_workers: (ceiling / 10).clamp(1, MAX_WORKERS),
            concurrency_ceiling: ceiling,
            timeout,
            max_retries: max_retries.max(1),
            retry_delay,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.concurrency_ceiling = ceiling.max(1);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: Option<u32>) -> Self {
        self.requests_per_second = requests_per_second.filter(|rps| *rps > 0);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Open connections allowed per host, also the idle keep-alive bound
    ///
    /// Total open connections are capped at `concurrency_ceiling`.
    pub fn connections_per_host(&self) -> usize {
        (self.concurrency_ceiling / 2).clamp(1, 100)
    }
}
