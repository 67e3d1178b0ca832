// Layered configuration
//
// Precedence (lowest first): built-in defaults, the config file
// (`--config` or config/iptv.toml), IPTV__SECTION__KEY environment
// variables, then the legacy single-name variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use iptv_infra_system::ConcurrencyConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/iptv.toml";

const REDACTED: &str = "***";

/// Legacy variables that predate the IPTV__ scheme: (env var, config key)
const LEGACY_ENV: [(&str, &str); 5] = [
    ("IPTV_DB_PATH", "database.path"),
    ("FOFA_API_TOKEN", "fofa_api_token"),
    ("HUNTER_API_KEY", "hunter_api_key"),
    ("QUAKE_API_TOKEN", "quake_api_token"),
    ("LOG_LEVEL", "log.level"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    pub pool_size: usize,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "data/iptv.db".to_string(),
            pool_size: 10,
            acquire_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    /// Total request timeout in seconds
    pub timeout: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub concurrency_limit: usize,
    pub user_agent: String,
    pub requests_per_second: Option<u32>,
    /// Blocking worker threads; derived from `concurrency_limit` when unset
    pub max_workers: Option<usize>,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            timeout: 15,
            max_retries: 3,
            retry_delay_ms: 1000,
            concurrency_limit: 800,
            user_agent: iptv_infra_system::engine::DEFAULT_USER_AGENT.to_string(),
            requests_per_second: None,
            max_workers: None,
        }
    }
}

impl ScraperSettings {
    pub fn concurrency(&self) -> ConcurrencyConfig {
        let config = ConcurrencyConfig::from_limits(
            self.concurrency_limit,
            Duration::from_secs(self.timeout),
            self.max_retries,
            Duration::from_millis(self.retry_delay_ms),
        )
        .with_rate_limit(self.requests_per_second)
        .with_user_agent(self.user_agent.clone());

        match self.max_workers {
            Some(workers) => config.with_workers(workers),
            None => config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub hotel_validate_hour: u32,
    pub speed_check_hour: u32,
    pub generate_hour: u32,
    pub cleanup_hour: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 60,
            hotel_validate_hour: 2,
            speed_check_hour: 6,
            generate_hour: 7,
            cleanup_hour: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// Daily-rolling log files go here; `None` logs to stdout only
    pub dir: Option<String>,
    /// "pretty" or "json"; IPTV_LOG_FORMAT wins over this
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: Some("data/logs".to_string()),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub timeout: u64,
    pub max_concurrent: usize,
    /// Seconds spent reading the target body through each proxy
    pub test_duration: u64,
    pub target_url: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            timeout: 15,
            max_concurrent: 50,
            test_duration: 10,
            target_url: iptv_infra_system::proxy_checker::DEFAULT_TARGET_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub ffprobe: String,
    pub ffmpeg: String,
    pub probe_timeout_secs: u64,
    pub speed_sample_secs: u32,
    pub port_timeout_secs: u64,
    /// Probe results written per transaction
    pub batch_size: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ffprobe: "ffprobe".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            probe_timeout_secs: 15,
            speed_sample_secs: 10,
            port_timeout_secs: 5,
            batch_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub scraper: ScraperSettings,
    pub scheduler: SchedulerSettings,
    pub log: LogSettings,
    pub proxy: ProxySettings,
    pub cache: CacheSettings,
    pub probe: ProbeSettings,
    pub output_dir: String,
    pub fofa_api_token: Option<String>,
    pub hunter_api_key: Option<String>,
    pub quake_api_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            scraper: ScraperSettings::default(),
            scheduler: SchedulerSettings::default(),
            log: LogSettings::default(),
            proxy: ProxySettings::default(),
            cache: CacheSettings::default(),
            probe: ProbeSettings::default(),
            output_dir: "data/output".to_string(),
            fofa_api_token: None,
            hunter_api_key: None,
            quake_api_token: None,
        }
    }
}

impl AppConfig {
    /// Load and merge every configuration layer
    ///
    /// A missing file is only an error when `path` was given explicitly.
    /// The format follows the file extension (TOML, JSON, YAML...).
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = File::with_name(path.unwrap_or(DEFAULT_CONFIG_PATH)).required(path.is_some());

        let mut builder = Config::builder().add_source(file).add_source(
            Environment::with_prefix("IPTV")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        for (var, key) in LEGACY_ENV {
            let value = std::env::var(var).ok().filter(|v| !v.is_empty());
            builder = builder.set_override_option(key, value)?;
        }

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        config.expand_paths();
        Ok(config)
    }

    fn expand_paths(&mut self) {
        self.database.path = expand(&self.database.path);
        self.output_dir = expand(&self.output_dir);
        if let Some(dir) = &self.log.dir {
            self.log.dir = Some(expand(dir));
        }
    }

    /// Copy with API tokens masked, for printing
    pub fn redacted(&self) -> Self {
        let mask = |token: &Option<String>| token.as_ref().map(|_| REDACTED.to_string());
        Self {
            fofa_api_token: mask(&self.fofa_api_token),
            hunter_api_key: mask(&self.hunter_api_key),
            quake_api_token: mask(&self.quake_api_token),
            ..self.clone()
        }
    }

    pub fn concurrency(&self) -> ConcurrencyConfig {
        self.scraper.concurrency()
    }
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}
