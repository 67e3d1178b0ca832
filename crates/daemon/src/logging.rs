// Tracing subscriber setup

use crate::config::LogSettings;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "iptv-harvest.log";

/// Keeps the non-blocking file writer flushing; hold it until exit
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. `IPTV_LOG_FORMAT=json` switches
/// stdout to JSON lines; file output is always plain text.
pub fn init(settings: &LogSettings) -> Result<LogGuard> {
    let default_directive = format!("iptv={}", settings.level.to_lowercase());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directive))
        .with_context(|| format!("invalid log filter '{default_directive}'"))?;

    let format = std::env::var("IPTV_LOG_FORMAT").unwrap_or_else(|_| settings.format.clone());

    let (file_layer, guard) = match &settings.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("failed to create log dir {dir}"))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    match format.as_str() {
        "json" => registry.with(fmt::layer().json()).try_init(),
        _ => registry.with(fmt::layer().pretty()).try_init(),
    }
    .context("failed to install tracing subscriber")?;

    Ok(LogGuard { _file: guard })
}
