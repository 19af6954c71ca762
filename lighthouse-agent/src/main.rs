//! Harbor Lighthouse - edge telemetry agent
//!
//! Runs N independently configured instances. Each one periodically pulls metrics
//! from a pluggable collector and ships them to the Harbor Scale ingest service:
//! - `raw` harbors get one merged document per cycle
//! - `cargo` harbors get one sample per metric, in batches, with 429 cooldown
//! - Every outcome lands in a shared status ledger persisted to `status.json`

mod cli;
mod collectors;
mod config;
mod engine;
mod harbor;
mod logging;
mod status;
mod transport;
mod updater;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use cli::Command;
use collectors::CollectorRegistry;
use config::{AgentConfig, Paths, LOG_FILE_NAME};
use engine::Supervisor;
use harbor::HarborRegistry;
use status::StatusLedger;
use transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let command = cli::Args::parse().action()?;

    // Corrupt routing data is fatal before anything else runs
    let harbors = HarborRegistry::bundled().context("Fatal: harbor definitions corrupted")?;
    let paths = Paths::resolve();

    if command != Command::Daemon {
        logging::init_console_logging();
    }

    match command {
        Command::Version => cli::print_version(),
        Command::AutoUpdate(enabled) => cli::set_auto_update(&paths, enabled).await?,
        Command::List => cli::list(&paths).await?,
        Command::Logs(name) => cli::show_logs(&paths, &name).await?,
        Command::Add(instance) => cli::add_instance(&paths, instance).await?,
        Command::Remove(name) => cli::remove_instance(&paths, &name).await?,
        Command::Daemon => run_daemon(paths, harbors).await?,
    }

    Ok(())
}

async fn run_daemon(paths: Paths, harbors: HarborRegistry) -> Result<()> {
    let _log_guard = match logging::init_daemon_logging(&paths.data_dir, LOG_FILE_NAME) {
        Ok(guard) => Some(guard),
        Err(e) => {
            logging::init_console_logging();
            warn!("File logging unavailable ({}), logging to console only", e);
            None
        }
    };

    info!("🚢 Harbor Lighthouse {} starting", updater::VERSION);
    info!("Data directory: {}", paths.data_dir.display());
    info!("Loaded {} harbor types", harbors.len());

    let config = AgentConfig::load(&paths.config_file())
        .await
        .context("Failed to load configuration")?;

    tokio::spawn(updater::run_background(config.auto_update));

    let transport = HttpTransport::new().context("Failed to build HTTP client")?;
    let supervisor = Supervisor::new(
        Arc::new(harbors),
        Arc::new(CollectorRegistry::with_builtins()),
        Arc::new(transport),
        StatusLedger::open(paths.status_file()),
    );

    supervisor.run(config.instances).await;
    Ok(())
}
