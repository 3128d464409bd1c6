mod migrations;
mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use voxroom_core::{
    bootstrap::{init_database, init_services, load_config},
    logging,
};

use server::VoxroomServer;

/// Real-time voice room server
#[derive(Debug, Parser)]
#[command(name = "voxroom", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "VOXROOM_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration
    let config = load_config(cli.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Voxroom server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Initialize database (optional) and apply migrations
    let pool = init_database(&config).await?;
    match &pool {
        Some(pool) => migrations::run_migrations(pool).await?,
        None => info!("No database configured, rooms are kept in memory only"),
    }

    // 4. Initialize services
    let services = init_services(config, pool.clone()).await?;

    // 5. Serve until a shutdown signal arrives
    VoxroomServer::new(services, pool).start().await
}
