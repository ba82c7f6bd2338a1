//! Command-line host for the REDDPWA background worker.
//!
//! Loads a worker configuration, opens the durable cache store and replays
//! events against one worker generation.
//!
//! ## Usage
//!
//! ```bash
//! # Install and activate the configured generation
//! reddpwa-host --config worker.json install
//!
//! # Replay requests through the worker
//! reddpwa-host fetch https://app.example/ --navigate
//!
//! # Render a push payload
//! reddpwa-host push '{"title":"New reply","data":{"url":"/r/rust"}}'
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use reddpwa_common::{init_logging, LogConfig, LogFormat};
use reddpwa_net::{HttpNetwork, LoaderConfig};
use reddpwa_sw::{
    ApplicationServerKey, Capabilities, EventOutcome, FetchRequest, PushSubscriptionOptions,
    Registration, ServiceWorker, SqliteCacheStorage, WorkerConfig, WorkerEvent,
};
use url::Url;

mod host;

use host::{HeadlessWindows, LogNotificationSink};

#[derive(Parser)]
#[command(name = "reddpwa-host")]
#[command(about = "Drive the REDDPWA background worker from the command line")]
struct Cli {
    /// Worker configuration (JSON); built-in defaults at `--origin` when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application origin when no configuration file is given
    #[arg(long, default_value = "http://localhost:3000/")]
    origin: Url,

    /// Durable cache database
    #[arg(long, default_value = "reddpwa-cache.db")]
    db: PathBuf,

    /// Log output format (pretty, compact, json)
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Log filter, e.g. `reddpwa_sw=debug`
    #[arg(long)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate the configured generation
    Install,

    /// Send requests through the worker
    Fetch {
        /// Absolute URLs
        urls: Vec<Url>,
        /// Treat the requests as page navigations
        #[arg(long)]
        navigate: bool,
    },

    /// Show cache size for the configured generation
    Stats,

    /// Delete every cache generation
    Clear,

    /// Deliver a push payload and print the resulting notification
    Push {
        /// Raw payload, usually JSON
        payload: String,
    },

    /// Decode a VAPID public key into push subscription options
    SubscribeOptions {
        /// URL-safe base64 application server key
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging = LogConfig::default().with_format(cli.log_format);
    if let Some(filter) = &cli.log_filter {
        logging = logging.with_filter(filter.clone());
    }
    init_logging(logging);

    match cli.command {
        Commands::SubscribeOptions { key } => {
            let options = PushSubscriptionOptions::new(ApplicationServerKey::from_base64url(&key)?);
            println!("userVisibleOnly:      {}", options.user_visible_only);
            println!(
                "applicationServerKey: {} bytes",
                options.application_server_key.as_bytes().len()
            );
            Ok(())
        }
        command => {
            let config = match cli.config {
                Some(path) => WorkerConfig::load(&path)?,
                None => WorkerConfig::new(cli.origin, "5"),
            };
            let host = Host::open(config, &cli.db)?;
            run(command, host).await
        }
    }
}

/// A worker wired to the durable store and the headless capabilities.
struct Host {
    worker: ServiceWorker,
    origin: Url,
    windows: Arc<HeadlessWindows>,
}

impl Host {
    fn open(config: WorkerConfig, db: &Path) -> anyhow::Result<Self> {
        let storage = SqliteCacheStorage::open(db)
            .with_context(|| format!("opening {}", db.display()))?;
        let windows = Arc::new(HeadlessWindows::default());
        let capabilities = Capabilities {
            storage: Arc::new(storage),
            network: Arc::new(HttpNetwork::new(LoaderConfig::default())?),
            notifications: Arc::new(LogNotificationSink),
            windows: windows.clone(),
        };
        let origin = config.origin.clone();
        Ok(Self {
            worker: ServiceWorker::new(config, capabilities)?,
            origin,
            windows,
        })
    }
}

async fn run(command: Commands, host: Host) -> anyhow::Result<()> {
    let Host {
        mut worker,
        origin,
        windows,
    } = host;

    match command {
        Commands::Install => {
            let mut registration = Registration::new(origin, windows);
            registration.register(worker).await?;
            let Some(active) = registration.active() else {
                bail!("generation installed but is still waiting");
            };
            let stats = active.cache_stats().await?;
            println!("Active cache: {}", active.cache_name());
            println!("  Entries:    {}", stats.entries);
            println!("  Bytes:      {}", stats.total_bytes);
        }

        Commands::Fetch { urls, navigate } => {
            for url in urls {
                let request = if navigate {
                    FetchRequest::navigate(url.clone())
                } else {
                    FetchRequest::get(url.clone())
                };
                let completion = worker.dispatch(WorkerEvent::Fetch(request)).await;
                let (outcome, report) = completion.finish().await;
                match outcome {
                    EventOutcome::Responded(response) => println!(
                        "{} {} ({} bytes{}, {} cache writes)",
                        response.status.as_u16(),
                        url,
                        response.body.len(),
                        if response.from_cache { ", cached" } else { "" },
                        report.completed,
                    ),
                    _ => println!("--- {url} (not intercepted)"),
                }
            }
        }

        Commands::Stats => {
            let stats = worker.cache_stats().await?;
            println!("Cache:   {}", worker.cache_name());
            println!("Entries: {}", stats.entries);
            println!("Bytes:   {}", stats.total_bytes);
        }

        Commands::Clear => {
            let deleted = worker.clear_caches().await?;
            println!("Deleted {deleted} cache(s)");
        }

        Commands::Push { payload } => {
            let completion = worker
                .dispatch(WorkerEvent::Push(Some(Bytes::from(payload))))
                .await;
            match completion.finish().await {
                (EventOutcome::NotificationShown(record), _) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                _ => println!("No notification shown"),
            }
        }

        Commands::SubscribeOptions { .. } => {}
    }

    Ok(())
}
