use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use vouchflow_browser::PlaywrightBrowser;
use vouchflow_common::AppConfig;
use vouchflow_web::{CheckoutRunner, TriggerServer};

/// vouchflow trigger server
#[derive(Parser)]
#[command(name = "vouchflowd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "VOUCHFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Environment file loaded before the process environment
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::resolve(args.config.as_deref(), Some(args.env_file.as_path()))?;

    let listen = args.listen.unwrap_or_else(|| config.server.listen.clone());
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {}", listen))?;

    if PlaywrightBrowser::check_installed().is_err() {
        warn!("Playwright not found. Install with: npx playwright install chromium");
    }

    let default_card = config.checkout.default_card;
    info!(
        "State store: {} (default card: {})",
        config.store.endpoint(),
        default_card
    );

    let runner = CheckoutRunner::new(config)?;
    let server = TriggerServer::new(Arc::new(runner), default_card);
    server.serve(addr).await
}
