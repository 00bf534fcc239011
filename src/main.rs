use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shelf_sync::net::probe;
use shelf_sync::remote::{FsRemote, StaticAuth};
use shelf_sync::{
    CaptureQueue, CaptureStore, Config, ConfigError, ConnectivityMonitor, RecordId, StatusBoard,
    StoreError, SyncEngine,
};

/// Command line front end for the capture queue
#[derive(Debug, Parser)]
#[command(name = "shelf-sync", version, about)]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Queue a picture for upload
    Enqueue {
        /// Store the picture belongs to
        #[arg(long)]
        store: String,
        file: PathBuf,
    },
    /// List queued pictures
    List {
        #[arg(long)]
        store: Option<String>,
        /// Include pictures that were already uploaded
        #[arg(long)]
        all: bool,
    },
    /// Delete a queued picture
    Remove { id: String },
    /// Run one sync pass now
    Sync {
        /// Skip the reachability probe and treat the device as offline
        #[arg(long)]
        offline: bool,
    },
    /// Keep syncing whenever the network is reachable, until Ctrl-C
    Watch,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read {path}: {source}")]
    ReadCapture {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for shutdown signal: {0}")]
    Signal(std::io::Error),
}

/// Wired-up queue, monitor and sync engine
struct App {
    config: Config,
    monitor: ConnectivityMonitor,
    queue: CaptureQueue,
    engine: Arc<SyncEngine>,
}

impl App {
    fn new(config: Config, online: bool) -> Self {
        let store = CaptureStore::open(&config.database_path);
        let monitor = ConnectivityMonitor::new(online);
        let status = StatusBoard::new(online, store.is_available());

        let remote = Arc::new(FsRemote::new(
            config.remote_root.clone(),
            config.public_base_url.clone(),
            config.max_object_bytes,
        ));
        let auth = Arc::new(StaticAuth::new(config.user_id.clone()));

        let queue = CaptureQueue::new(store.clone(), status.clone(), auth);
        let engine = Arc::new(SyncEngine::new(
            store,
            monitor.clone(),
            remote.clone(),
            remote,
            status,
            config.sync_settings(),
        ));

        Self {
            config,
            monitor,
            queue,
            engine,
        }
    }

    async fn probe(config: &Config) -> bool {
        probe::probe_once(&config.probe_addr, config.probe_timeout()).await
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shelf_sync=info")),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Enqueue { store, file } => {
            let app = App::new(config, false);
            let payload = tokio::fs::read(&file).await.map_err(|source| CliError::ReadCapture {
                path: file.display().to_string(),
                source,
            })?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "capture".to_string());

            let id = app.queue.capture(&store, payload, &file_name).await?;
            println!("{id}");
        }
        Command::List { store, all } => {
            let app = App::new(config, false);
            let records = if all {
                app.queue.list_all(store.as_deref()).await?
            } else {
                app.queue.list_pending(store.as_deref()).await?
            };

            for record in &records {
                let status = if record.uploaded { "uploaded" } else { "pending" };
                let captured = chrono::DateTime::from_timestamp_millis(record.created_at_ms)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!(
                    "{}\t{}\t{}\t{}\t{} bytes\t{}",
                    record.id,
                    record.owner_id,
                    record.file_name,
                    captured,
                    record.payload.len(),
                    status
                );
            }
            info!(count = records.len(), "Listed captures");
        }
        Command::Remove { id } => {
            let app = App::new(config, false);
            app.queue.remove(&RecordId::from(id)).await?;
        }
        Command::Sync { offline } => {
            let online = !offline && App::probe(&config).await;
            let app = App::new(config, online);
            let report = app.engine.sync_with_report().await;
            let pending = app.queue.count_pending().await?;
            println!(
                "uploaded {}, failed {}, {} pending",
                report.uploaded, report.failed, pending
            );
        }
        Command::Watch => {
            let online = App::probe(&config).await;
            let app = App::new(config, online);

            let prober = probe::spawn_probe(
                app.monitor.clone(),
                app.config.probe_addr.clone(),
                app.config.probe_interval(),
                app.config.probe_timeout(),
            );
            let auto_sync = app.engine.spawn_auto_sync();
            let badge = spawn_status_log(app.engine.status().clone());

            info!(pending = app.queue.count_pending().await?, online, "Watching for connectivity");
            let stopped = tokio::signal::ctrl_c().await;

            prober.abort();
            auto_sync.abort();
            badge.abort();
            stopped.map_err(CliError::Signal)?;
        }
    }

    Ok(())
}

/// Log every status change, the terminal equivalent of a badge
fn spawn_status_log(status: StatusBoard) -> tokio::task::JoinHandle<()> {
    let mut rx = status.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let s = *rx.borrow_and_update();
            info!(
                online = s.is_online,
                pending = s.pending_count,
                syncing = s.syncing,
                "Status"
            );
        }
    })
}
