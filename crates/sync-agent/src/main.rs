//! sync-agent: keeps a vault's sync state in line with the local Syncthing daemon.
//!
//! Watches the vault for local edits, records them as pending, and follows
//! the daemon's event stream until each edit has been indexed.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{EngineEvent, SyncEngine, SyncOutcome};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sync_agent::cli::{Args, Command, Keep};
use sync_agent::http::HttpDaemonClient;
use sync_agent::native_fs::NativeFs;
use sync_agent::watcher::{FileEventKind, FileWatcher};

type Engine = SyncEngine<HttpDaemonClient, NativeFs>;

/// How often an idle agent retries reaching the daemon.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,sync_agent=debug,sync_core=debug"
    } else {
        "info,sync_agent=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let vault = args.vault_path();
    let vault = vault
        .canonicalize()
        .with_context(|| format!("Vault not found: {}", vault.display()))?;
    let config = args.bridge_config()?;
    debug!("Vault path: {:?}, daemon: {}", vault, config.api_url());
    if !config.is_configured() {
        warn!("No API key or folder configured, the daemon will not be contacted");
    }

    let api = Arc::new(HttpDaemonClient::new(&config)?);
    let fs = Arc::new(NativeFs::new(vault.clone()));
    let engine = SyncEngine::new(config, vault.to_string_lossy(), api, fs).await;

    if args.command() == Command::Run {
        return run(&engine, &args).await;
    }
    let result = one_shot(&engine, args.command()).await;
    engine.store().flush().await;
    result
}

async fn run(engine: &Engine, args: &Args) -> Result<()> {
    info!("Starting sync-agent");

    let mut watcher = FileWatcher::new(args.vault_path())?;
    info!("File watcher started on {:?}", watcher.vault_path());

    let (bus_tx, mut bus_rx) = mpsc::unbounded_channel();
    let _subscription = engine.bus().subscribe(move |event| {
        let _ = bus_tx.send(event);
    });

    let report = engine.activate().await;
    if report.total() > 0 {
        info!(
            "Reconciled {} pending path(s): {} synced, {} unconfirmed, {} failed",
            report.total(),
            report.synced.len(),
            report.unconfirmed.len(),
            report.failed.len()
        );
    }
    info!("Folder status: {}", engine.status());

    let mut reconnect = tokio::time::interval(RECONNECT_INTERVAL);
    reconnect.tick().await;

    info!("Agent running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            // Local edits
            Some(event) = watcher.event_rx().recv() => match event.kind {
                FileEventKind::Modified => {
                    if engine.on_local_edit(&event.path) {
                        debug!("Pending: {}", event.path);
                    }
                }
                FileEventKind::Deleted => {
                    debug!("File deleted: {}", event.path);
                }
            },

            // Engine notifications
            Some(event) = bus_rx.recv() => match event {
                EngineEvent::DevicesChanged => {
                    let devices = engine.refresh_devices().await;
                    info!("{} device(s) connected", devices.connected);
                }
                EngineEvent::HistoryChanged => {
                    engine.refresh_history().await;
                }
                EngineEvent::StatusChanged { status } => info!("Folder status: {}", status),
                EngineEvent::FileSynced { path } => debug!("Synced: {}", path),
                EngineEvent::FilePending { .. } => {}
            },

            // Retry when the daemon was not reachable at startup
            _ = reconnect.tick() => {
                if !engine.is_monitoring() {
                    debug!("Retrying daemon connection");
                    engine.activate().await;
                }
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    engine.deactivate().await;
    Ok(())
}

async fn one_shot(engine: &Engine, command: Command) -> Result<()> {
    let status = engine.check_connection().await;
    if status.is_reachable() {
        engine.refresh_binding().await?;
    }

    match command {
        Command::Run | Command::Status => {
            println!("Status:  {}", status);
            if let Some(at) = engine.last_converged() {
                println!("Last up to date: {}", at.to_rfc3339());
            }
            let devices = engine.refresh_devices().await;
            println!("Devices: {} connected {:?}", devices.connected, devices.names);
            for entry in engine.store().pending_entries() {
                println!("pending  {}", entry.path);
            }
        }

        Command::Sync { path } => match engine.sync_file(&path).await? {
            SyncOutcome::Converged => println!("{}: synced", path),
            SyncOutcome::Unconfirmed => bail!("{}: not confirmed by the daemon yet", path),
        },

        Command::Scan => {
            engine.force_scan_folder().await?;
            println!("Scan requested");
        }

        Command::TogglePause => {
            let paused = engine.toggle_pause().await?;
            println!("{}", if paused { "Paused" } else { "Resumed" });
        }

        Command::History => {
            for item in engine.refresh_history().await {
                let time = item
                    .timestamp
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<19}  {:<3}  {:<7}  {}",
                    time,
                    format!("{:?}", item.direction).to_lowercase(),
                    format!("{:?}", item.action).to_lowercase(),
                    item.path
                );
            }
        }

        Command::Conflicts => {
            for artifact in engine.conflicts().await? {
                println!(
                    "{}  {}  (original: {})",
                    artifact.timestamp_label(),
                    artifact.conflict_path,
                    artifact.original_path
                );
            }
        }

        Command::Resolve { path, keep } => {
            let artifact = engine
                .conflicts()
                .await?
                .into_iter()
                .find(|a| a.conflict_path == path)
                .with_context(|| format!("No conflict copy at {}", path))?;
            match keep {
                Keep::Original => engine.resolve_keep_original(&artifact).await?,
                Keep::Conflict => engine.resolve_accept_conflict(&artifact).await?,
            }
            println!("Resolved {}", artifact.original_path);
        }

        Command::Versions { path } => {
            let versions = engine.versions(&path).await?;
            if versions.is_empty() {
                warn!("No archived versions of {}", path);
            }
            for version in versions {
                println!(
                    "{}  modified {}  {} bytes",
                    version.version_time.to_rfc3339(),
                    version.mod_time.to_rfc3339(),
                    version.size
                );
            }
        }

        Command::Restore { path, version_time } => {
            engine.restore_version(&path, version_time).await?;
            println!("Restored {}", path);
        }

        Command::Ignores => {
            print!("{}", engine.load_ignore_rules().await?);
        }
    }

    Ok(())
}
