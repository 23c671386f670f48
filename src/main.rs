//! Nexus - gateway for Firmata boards reachable over TCP

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nexus::{
    catalog::Catalog,
    config::{Args, Config},
    firmata::FirmataConnector,
    server, AppState, Boards,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("nexus={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config_path = args.config_path();
    let config = Config::load(&config_path)?;
    let catalog = Catalog::from_config(&config)?;

    info!("======================================");
    info!("  Nexus - Firmata board gateway");
    info!("======================================");
    info!("Config: {}", config_path.display());
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if config.dev { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Boards: {}", catalog.boards().len());
    for board in catalog.boards() {
        info!(
            "  board-{}: {} ({}) at {}",
            board.index,
            board.name,
            board.model.name(),
            board.address
        );
    }
    info!("Groups: {}", catalog.groups().len());
    info!("======================================");

    if catalog.boards().is_empty() {
        warn!("No boards configured");
    }

    let boards = Boards::start(FirmataConnector::new(), catalog.targets(), args.board_settings());
    let state = Arc::new(AppState::new(args, catalog, boards.clone())?);

    let mut server = tokio::spawn(server::run(Arc::clone(&state)));

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
            boards.shutdown();
            server.await
        }
        finished = &mut server => {
            boards.shutdown();
            finished
        }
    };

    match finished {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("Server task failed: {}", e);
            Err(e.into())
        }
    }
}
