use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;

use botfleet_engine::{Fleet, FleetDeps, ScanProvider, SimConnector};
use botfleet_server::{ServerConfig, ShutdownCoordinator};
use botfleet_settings::{load_settings, load_settings_from_path, FleetSettings};
use botfleet_store::{Database, ServerHistoryRepo, SessionRepo};
use botfleet_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "botfleet", version, about = "Supervisor for a fleet of game-world bot sessions")]
struct Cli {
    /// Settings file (defaults to ~/.botfleet/settings.json)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    host: Option<String>,
    /// SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<FleetSettings> {
        let mut settings = match &self.config {
            Some(path) => load_settings_from_path(path)?,
            None => load_settings()?,
        };
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(db) = &self.db {
            settings.storage.db_path = db.to_string_lossy().into_owned();
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings().context("failed to load settings")?;
    init_telemetry(&TelemetryConfig::from_directive(&settings.logging.level, settings.logging.json));

    let db_path = Path::new(&settings.storage.db_path);
    let db = Database::open(db_path).with_context(|| format!("failed to open {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    let (events, _) = broadcast::channel(1024);
    let (fleet, dispatcher) = Fleet::start(FleetDeps {
        connector: Arc::new(SimConnector::auto()),
        store: Arc::new(SessionRepo::new(db.clone())),
        world: Arc::new(ScanProvider::new(settings.world.clone())),
        events,
        timings: settings.lifecycle.clone(),
    });
    let resumed = fleet.restore().context("failed to restore sessions")?;

    let shutdown = ShutdownCoordinator::new();
    let handle = botfleet_server::start(
        ServerConfig::from(&settings.server),
        Arc::clone(&fleet),
        ServerHistoryRepo::new(db),
        shutdown.token(),
    )
    .await
    .context("failed to start server")?;
    tracing::info!(addr = %handle.addr, resumed, "botfleet ready");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");

    fleet.shutdown();
    let mut tasks = handle.into_tasks();
    tasks.push(dispatcher);
    shutdown.graceful_shutdown(tasks, None).await;
    Ok(())
}
