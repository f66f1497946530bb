//! tgState Relay - media upload relay for tgState file hosts

use clap::Parser;
use std::path::PathBuf;
use tgstate_relay::{config::Config, server::Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// tgState Relay - forwards media uploads and keeps an upload history
#[derive(Parser, Debug)]
#[command(name = "tgstate-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file. Without one, settings come from the environment
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), used when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if args.json {
        builder.json().try_init().map_err(|e| anyhow::anyhow!(e))?;
    } else {
        builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
    }

    info!("Starting tgState Relay v{}", tgstate_relay::VERSION);

    // Load configuration
    let config = match args.config {
        Some(ref path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => {
            let config = Config::from_env()?;
            info!("Loaded configuration from environment");
            config
        }
    };

    info!(
        base_url = %config.relay.base_url,
        endpoint = %config.relay.endpoint(),
        store = %config.store.path.display(),
        "Relay configured"
    );

    // Start server
    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
