//! azx - parallel chunked transfers to Azure Blob Storage
//!
//! Command-line front end over the azxfer transfer engine.

use azxfer::cli::{Cli, Commands};
use azxfer::config::{self, Config};
use azxfer::error::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.debug);

    // Execute the command
    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting azx");

    // Config commands must work before the storage account is set
    let config: Config = match &cli.command {
        Commands::Config { .. } => config::load_config_no_validation().await?,
        _ => config::load_config().await?,
    };

    cli.execute(config).await?;

    Ok(())
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "azxfer=debug" } else { "azxfer=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
