//! Betgammon Server Binary
//!
//! Stake-matching and escrow service for two-player wagers.

use betgammon::{api::ApiServer, config::ConfigLoader};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "betgammon")]
#[command(about = "Betgammon stake-matching server", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<String>,

    /// Listen host (overrides configuration)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides configuration)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    betgammon::config::validate(&config)?;

    ApiServer::new(config).run().await
}
