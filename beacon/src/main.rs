//! beacon - client telemetry queue and delivery
//!
//! This tool provides commands for:
//! - Inspecting the local queue and delivery configuration
//! - Recording events into the queue
//! - Flushing queued events to the collection service
//! - Running the background worker over stdin/stdout
//!
//! Uses XDG Base Directory specification for file locations:
//! - Queue: $XDG_DATA_HOME/beacon/queue.db (~/.local/share/beacon/queue.db)
//! - Config: $XDG_CONFIG_HOME/beacon/config.toml (~/.config/beacon/config.toml)
//! - Logs: $XDG_STATE_HOME/beacon/ (~/.local/state/beacon/)

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use beacon_core::{
    Config, EventKind, FlushEngine, FlushReport, HttpTransport, IdentityProvider, QueueHandle,
    Tracker, WorkerRegistration,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::io::BufReader;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Queue client telemetry locally and deliver it in batches")]
#[command(version)]
struct Args {
    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show delivery configuration and queue state
    Status,

    /// Record one event in the queue
    Track {
        /// Event kind, e.g. page_view or web_vital
        kind: String,

        /// Kind-specific fields as a JSON object
        #[arg(short, long)]
        data: Option<String>,

        /// Page URL the event belongs to
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Deliver all unsynced events now
    Flush,

    /// Remove entries already delivered
    Purge,

    /// Run the background worker, reading JSON requests from stdin
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    let mut logging = config.logging.clone();
    if args.verbose {
        logging.level = "debug".to_string();
    }
    let _log_guard =
        beacon_core::logging::init(&logging).context("failed to initialize logging")?;

    let queue = QueueHandle::from_config(&config.queue);

    match args.command {
        Command::Status => cmd_status(&config, &queue).await,
        Command::Track { kind, data, url } => {
            cmd_track(&config, queue, &kind, data.as_deref(), url.as_deref()).await
        }
        Command::Flush => cmd_flush(&config, queue).await,
        Command::Purge => cmd_purge(&queue).await,
        Command::Worker => cmd_worker(&config, queue).await,
    }
}

fn flush_engine(config: &Config, queue: QueueHandle) -> Result<FlushEngine> {
    if !config.transport.is_ready() {
        bail!(
            "no collection service configured; set transport.server_url in {}",
            Config::config_path().display()
        );
    }
    let transport =
        HttpTransport::new(config.transport.clone()).context("invalid transport configuration")?;
    Ok(FlushEngine::new(queue, Arc::new(transport)))
}

async fn cmd_status(config: &Config, queue: &QueueHandle) -> Result<()> {
    println!("Beacon Status");
    println!("=============");
    println!();

    println!("Config:          {}", Config::config_path().display());
    println!("Queue:           {}", config.queue.resolved_path().display());
    match &config.transport.server_url {
        Some(url) => println!("Server URL:      {}", url),
        None => println!("Server URL:      (not configured)"),
    }
    if config.transport.is_ready() {
        let reachable = match HttpTransport::new(config.transport.clone()) {
            Ok(transport) => transport.health_check().await,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid transport configuration");
                false
            }
        };
        println!("Reachable:       {}", if reachable { "yes" } else { "no" });
    }
    println!(
        "API Key:         {}",
        if config.transport.api_key.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!("Flush interval:  {}s", config.flush.interval_secs);
    println!(
        "Periodic sync:   {} (permission: {:?})",
        if config.worker.periodic_sync.enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.worker.periodic_sync.permission
    );
    println!();

    let stats = queue.stats().await.context("failed to read queue")?;
    println!("Queued entries:  {}", stats.total);
    println!("  Unsynced:      {}", stats.unsynced);
    println!("  Synced:        {}", stats.synced);
    if stats.unreadable > 0 {
        println!(
            "  Unreadable:    {} (counted as unsynced, never delivered)",
            stats.unreadable
        );
    }

    if !stats.unsynced_by_kind.is_empty() {
        println!();
        println!("Unsynced by kind:");
        for (kind, count) in &stats.unsynced_by_kind {
            println!("  {:<18} {}", kind, count);
        }
    }

    if let Some(at) = stats
        .oldest_unsynced_at
        .and_then(DateTime::<Utc>::from_timestamp_millis)
    {
        println!();
        println!("Oldest unsynced: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

async fn cmd_track(
    config: &Config,
    queue: QueueHandle,
    kind: &str,
    data: Option<&str>,
    url: Option<&str>,
) -> Result<()> {
    let kind: EventKind = kind.parse().map_err(anyhow::Error::msg)?;

    let mut fields = match data {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--data is not valid JSON")? {
            Value::Object(map) => map,
            _ => bail!("--data must be a JSON object"),
        },
        None => Map::new(),
    };
    if let Some(url) = url {
        fields.insert("url".to_string(), Value::String(url.to_string()));
    }

    let tracker = Tracker::new(queue, IdentityProvider::new(config.identity.clone()));
    match tracker.track_raw(kind.as_str(), Some(fields)).await {
        Some(id) => {
            println!("Queued {} event #{}", kind, id);
            Ok(())
        }
        None => bail!(
            "{} event was not queued; see the logs in {}",
            kind,
            beacon_core::logging::log_dir().display()
        ),
    }
}

async fn cmd_flush(config: &Config, queue: QueueHandle) -> Result<()> {
    let engine = flush_engine(config, queue)?;
    let report = engine.flush().await;
    print_report(&report);

    if !report.is_complete() {
        bail!(
            "{} of {} events not delivered; they stay queued",
            report.attempted - report.delivered(),
            report.attempted
        );
    }
    Ok(())
}

fn print_report(report: &FlushReport) {
    if report.attempted == 0 {
        println!("Nothing to flush");
        return;
    }

    println!("Attempted:  {}", report.attempted);
    println!("Delivered:  {}", report.delivered());
    for kind in &report.accepted_kinds {
        println!("  accepted  {}", kind);
    }
    for kind in &report.failed_kinds {
        println!("  failed    {}", kind);
    }
    match report.fallback {
        Some(true) => println!("Batch fallback: delivered"),
        Some(false) => println!("Batch fallback: failed"),
        None => {}
    }
    println!("Purged:     {}", report.purged);
}

async fn cmd_purge(queue: &QueueHandle) -> Result<()> {
    let purged = queue
        .purge_synced()
        .await
        .context("failed to purge queue")?;
    println!("Purged {} synced entries", purged);
    Ok(())
}

async fn cmd_worker(config: &Config, queue: QueueHandle) -> Result<()> {
    let engine = flush_engine(config, queue.clone())?;
    let tracker = Tracker::new(queue, IdentityProvider::new(config.identity.clone()));

    let registration = WorkerRegistration::new(config.worker.clone());
    let client = match registration.register(engine, tracker).await {
        Some(client) => client,
        None => bail!("background worker failed to start; queue unavailable"),
    };
    tracing::info!("Serving worker requests on stdin");

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        served = beacon_core::worker::serve_lines(&client, stdin, stdout) => {
            let served = served.context("worker channel failed")?;
            tracing::info!(served, "Worker input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; stopping worker");
        }
    }

    registration.unregister();
    Ok(())
}
