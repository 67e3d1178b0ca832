//! IPTV Harvest - Main Entry Point
//!
//! One binary: `serve` hosts the scheduler, every other subcommand runs a
//! single workload against the same store and exits.

mod config;
mod context;
mod jobs;
mod logging;
mod services;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::AppConfig;
use context::AppContext;
use iptv_infra_system::{Engine, ProxyEndpoint};
use jobs::JobKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long shutdown waits for in-flight jobs
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "iptv-harvest")]
#[command(about = "IPTV source harvesting, probing and playlist generation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "IPTV_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic scheduler until Ctrl-C
    Serve,

    /// Check store health
    Health {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show catalogue statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Probe resolution and speed of unprobed channels
    ProbeSpeed {
        /// Maximum number of channels to probe
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// TCP-check every hotel gateway
    CheckHotels,

    /// Validate HTTP/SOCKS5 proxies
    ProxyCheck {
        /// Proxies as scheme://[user:pass@]host:port or host:port
        proxies: Vec<String>,

        /// File with one proxy per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// URL fetched through each proxy
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Write iptv.txt and iptv.m3u
    Generate,

    /// Delete channels carrying a sign value
    Cleanup {
        #[arg(short, long, default_value = "0")]
        sign: i64,
    },

    /// List scheduled jobs and their last recorded run
    Tasks,

    /// Run one scheduled job immediately
    RunTask {
        /// Job name (see `tasks`)
        name: String,
    },
}

#[derive(Tabled)]
struct TaskRow {
    name: String,
    schedule: String,
    status: String,
    last_run: String,
    next_run: String,
    result: String,
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "type")]
    channel_type: String,
    channels: i64,
}

#[derive(Tabled)]
struct ProxyRow {
    proxy: String,
    valid: String,
    status: String,
    latency_ms: String,
    bytes: u64,
    error: String,
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.log)?;
    info!(version = VERSION, "IPTV Harvest starting");
    tracing::debug!(config = ?config.redacted(), "Configuration loaded");

    let ctx = AppContext::open(config).await?;
    let outcome = dispatch(&ctx, cli.command).await;
    ctx.shutdown(DRAIN_TIMEOUT).await;
    outcome
}

async fn dispatch(ctx: &Arc<AppContext>, command: Commands) -> Result<()> {
    match command {
        Commands::Serve => serve(ctx).await?,

        Commands::Health { json } => {
            let report = ctx.storage.health_check().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", "Store Health".cyan().bold());
                println!();
                let status = if report.is_healthy() {
                    "HEALTHY".green()
                } else {
                    "UNHEALTHY".red()
                };
                println!("  {} {}", "Status:".bold(), status);
                println!("  {} {}", "Path:".bold(), report.db_path);
                println!("  {} {}", "Tables:".bold(), report.table_count);
                println!("  {} {}", "Channels:".bold(), report.channel_count);
                println!("  {} {}", "Hotels:".bold(), report.hotel_count);
                println!("  {} {:.2} MB", "DB Size:".bold(), report.db_size_mb);
                println!(
                    "  {} {} idle / {} in use (size {})",
                    "Pool:".bold(),
                    report.pool.idle,
                    report.pool.in_use,
                    report.pool.size
                );
                if let Some(error) = &report.error {
                    println!("  {} {}", "Error:".bold(), error.red());
                }
            }
            if !report.is_healthy() {
                anyhow::bail!("store is unhealthy");
            }
        }

        Commands::Stats { json } => {
            let stats = services::collect_stats(ctx).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", "Catalogue".cyan().bold());
                println!();
                println!("  {} {}", "Channels:".bold(), stats.total_channels);
                println!("  {} {}", "Publishable:".bold(), stats.publishable_channels);
                println!("  {} {} ({} online)", "Hotels:".bold(), stats.hotels, stats.hotels_online);
                if !stats.by_type.is_empty() {
                    println!();
                    let rows: Vec<CountRow> = stats
                        .by_type
                        .into_iter()
                        .map(|(channel_type, channels)| CountRow {
                            channel_type,
                            channels,
                        })
                        .collect();
                    println!("{}", Table::new(rows));
                }
            }
        }

        Commands::ProbeSpeed { limit } => {
            let report = Engine::scope(ctx.concurrency.clone(), |engine| async move {
                services::check_channel_speeds(ctx, &engine, limit).await
            })
            .await??;
            println!(
                "{}",
                format!("✓ {} channels probed, {} playable", report.candidates, report.playable)
                    .green()
                    .bold()
            );
            if report.stored < report.candidates {
                println!("  {} {} results not stored", "✗".red(), report.candidates - report.stored);
            }
        }

        Commands::CheckHotels => {
            let report = Engine::scope(ctx.concurrency.clone(), |engine| async move {
                services::validate_hotels(ctx, &engine).await
            })
            .await??;
            println!(
                "{}",
                format!("✓ {} of {} hotels online", report.online, report.checked)
                    .green()
                    .bold()
            );
        }

        Commands::ProxyCheck {
            proxies,
            file,
            target,
        } => proxy_check(ctx, proxies, file, target).await?,

        Commands::Generate => {
            let report = services::generate_playlists(ctx).await?;
            match (&report.txt_path, &report.m3u_path) {
                (Some(txt), Some(m3u)) => {
                    println!(
                        "{}",
                        format!("✓ {} channels in {} sections", report.channels, report.sections)
                            .green()
                            .bold()
                    );
                    println!("  {} {}", "TXT:".bold(), txt.display());
                    println!("  {} {}", "M3U:".bold(), m3u.display());
                }
                _ => println!("{}", "No enabled categories, nothing written".yellow()),
            }
        }

        Commands::Cleanup { sign } => {
            let deleted = services::cleanup_channels(ctx, sign).await?;
            println!("{}", format!("✓ {deleted} channels deleted").green().bold());
        }

        Commands::Tasks => {
            let runs = ctx.task_runs.list().await?;
            let rows: Vec<TaskRow> = JobKind::ALL
                .iter()
                .map(|kind| {
                    let run = runs.iter().find(|r| r.name == kind.name());
                    TaskRow {
                        name: kind.name().to_string(),
                        schedule: kind.schedule(&ctx.config.scheduler),
                        status: run.map_or_else(|| "never".to_string(), |r| r.status.clone()),
                        last_run: or_dash(run.and_then(|r| r.last_run)),
                        next_run: or_dash(run.and_then(|r| r.next_run)),
                        result: or_dash(run.and_then(|r| r.result.clone())),
                    }
                })
                .collect();
            println!("{}", Table::new(rows));
        }

        Commands::RunTask { name } => {
            let kind = JobKind::from_name(&name).with_context(|| {
                let known: Vec<&str> = JobKind::ALL.iter().map(JobKind::name).collect();
                format!("unknown task '{name}' (known: {})", known.join(", "))
            })?;
            println!("{}", format!("Running {name}...").cyan().bold());
            match kind.execute(ctx).await {
                Ok(summary) => println!("  {} {}", "✓".green(), summary),
                Err(e) => {
                    println!("  {} {}", "✗".red(), e);
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

async fn serve(ctx: &Arc<AppContext>) -> Result<()> {
    if !ctx.config.scheduler.enabled {
        warn!("Scheduler disabled in configuration, nothing to serve");
        return Ok(());
    }

    let scheduler = ctx.init_scheduler().await;
    scheduler.start().await;
    let status = scheduler.status();
    info!(
        tasks = status.total_tasks,
        enabled = status.enabled_tasks,
        "Scheduler running (Ctrl-C to stop)"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping scheduler...");
    Ok(())
}

async fn proxy_check(
    ctx: &AppContext,
    mut raw: Vec<String>,
    file: Option<PathBuf>,
    target: Option<String>,
) -> Result<()> {
    if let Some(path) = file {
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        raw.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }

    let mut proxies = Vec::with_capacity(raw.len());
    for entry in &raw {
        match entry.parse::<ProxyEndpoint>() {
            Ok(proxy) => proxies.push(proxy),
            Err(e) => println!("  {} skipping '{}': {}", "○".yellow(), entry, e),
        }
    }
    if proxies.is_empty() {
        anyhow::bail!("no valid proxies given");
    }

    let checker = Arc::new(ctx.proxy_checker(target));
    let outcome = Engine::scope(ctx.concurrency.clone(), |engine| async move {
        checker.check_all(&engine, proxies, None).await
    })
    .await?;

    let total = outcome.results.len();
    let valid = outcome.results.iter().filter(|r| r.valid).count();
    let rows: Vec<ProxyRow> = outcome
        .results
        .into_iter()
        .map(|r| ProxyRow {
            proxy: r.proxy,
            valid: if r.valid { "✓".to_string() } else { "✗".to_string() },
            status: or_dash(r.status),
            latency_ms: format!("{:.0}", r.latency_ms),
            bytes: r.bytes_read,
            error: r.error.unwrap_or_default(),
        })
        .collect();
    println!("{}", Table::new(rows));
    println!();
    println!("{}", format!("✓ {valid} of {total} proxies valid").green().bold());
    Ok(())
}
