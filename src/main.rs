//! clubledger - reconciliation and synchronization engine for group
//! activity counters.
//!
//! Converts unreliable upstream cumulative snapshots into an append-only
//! daily ledger per group, with late-joiner quota proration, membership
//! churn detection, and calendar-month archival. Runs as a long-lived
//! process that syncs every configured group on a fixed interval.

mod api;
mod archive;
mod cache;
mod config;
mod delta;
mod models;
mod period;
mod proxy;
mod quota;
mod read;
mod reconcile;
mod retry;
mod store;
mod sync;

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use api::UpstreamClient;
use cache::SmartCache;
use config::AppConfig;
use proxy::ProxyRotation;
use retry::RetryPolicy;
use store::FileLedgerStore;
use sync::{CooldownTracker, SyncOrchestrator};

/// How long a seeded transfer record stays resolvable. Long enough to span a
/// whole pass including retry rounds.
const TRANSFER_TTL_SECS: u64 = 3600;

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily-rolling file under the log dir. Use the
/// RUST_LOG env var to control the level (e.g. RUST_LOG=debug).
fn init_tracing(log_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log dir {}", log_dir.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::daily(log_dir, "clubledger.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(filter)
        .init();

    Ok(guard)
}

/// Print a group's latest ledger rows to stdout as tab-separated cells.
fn show_ledger(config: &AppConfig, group: &str) -> Result<()> {
    let mut cache = SmartCache::new(config.cache_dir()?, config.cache_ttl_secs as i64)?;
    let store = FileLedgerStore::new(config.data_dir()?)?;

    match read::get_latest_ledger(&mut cache, &store, group)? {
        read::LedgerRead::Fresh { rows, as_of } => {
            eprintln!("{} rows as of {}", rows.len(), as_of);
            for row in rows {
                println!("{}", row.join("\t"));
            }
        }
        read::LedgerRead::Stale { rows, as_of } => {
            eprintln!("STALE: {} rows, last good data from {}", rows.len(), as_of);
            for row in rows {
                println!("{}", row.join("\t"));
            }
        }
        read::LedgerRead::NotFound => {
            eprintln!("No data yet for '{}'", group);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = AppConfig::load()?;

    // Check for CLI commands
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 && args[1] == "--show" {
        return show_ledger(&config, &args[2]);
    }

    let _log_guard = init_tracing(&config.log_dir()?)?;
    info!(groups = config.groups.len(), "clubledger starting");

    let proxies = match config.proxy_file {
        Some(ref path) => ProxyRotation::load(path).context("Failed to load proxy file")?,
        None => ProxyRotation::disabled(),
    };
    let fetch_policy = RetryPolicy {
        max_attempts: config.retry_max_attempts,
        ..RetryPolicy::default()
    };
    let client = UpstreamClient::new(config.upstream_base_url.clone(), fetch_policy, proxies)
        .context("Failed to build upstream client")?;

    let store = FileLedgerStore::new(config.data_dir()?)
        .context("Failed to open ledger store")?;
    let cache = SmartCache::new(config.cache_dir()?, config.cache_ttl_secs as i64)
        .context("Failed to open cache")?;

    let mut orchestrator = SyncOrchestrator::new(
        client,
        store,
        cache,
        config.groups.clone(),
        CooldownTracker::new(config.group_cooldown()),
        models::TransferIndex::new(std::time::Duration::from_secs(TRANSFER_TTL_SECS)),
        RetryPolicy::default(),
        config.inter_group_delay(),
    );

    let mut interval = tokio::time::interval(config.sync_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let today = Local::now().date_naive();
        info!(%today, "starting sync pass");
        let report = orchestrator.run_pass(today).await;
        for failed in report.failed_groups() {
            error!(group = failed, "group did not sync this pass");
        }
    }
}
