//! Vouchflow CLI - Main Entry Point
//!
//! Validates the environment, runs checkouts in-process, talks to a running
//! trigger server, inspects the OTP state store and claims vouchers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vouchflow_common::{AppConfig, PaymentCard};

mod claim;
mod client;
mod commands;
mod output;

use commands::{claim as claim_cmd, run, store, trigger, validate};

/// Vouchflow CLI - gift voucher checkout automation
#[derive(Parser)]
#[command(name = "vouchflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "VOUCHFLOW_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Dotenv file layered over the config
    #[arg(long, default_value = ".env", global = true)]
    env_file: PathBuf,

    /// Trigger server address
    #[arg(long, env = "VOUCHFLOW_SERVER", default_value = "http://127.0.0.1:3000", global = true)]
    server: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check required and optional environment variables
    Validate,

    /// Run a checkout in this process
    Run(run::RunArgs),

    /// Ask the trigger server to start a run
    Start {
        /// Card to pay with (membership-rewards, gold-charge)
        #[arg(long)]
        card: Option<PaymentCard>,
    },

    /// Show trigger server status
    Status,

    /// Inspect the OTP state store
    #[command(subcommand)]
    Store(store::StoreCommands),

    /// Claim a voucher on the rewards wallet
    Claim(claim_cmd::ClaimArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let load_config = || AppConfig::resolve(cli.config.as_deref(), Some(cli.env_file.as_path()));

    let ok = match cli.command {
        Commands::Validate => validate::execute(&cli.env_file, cli.format)?,
        Commands::Run(args) => run::execute(args, load_config()?, cli.format).await?,
        Commands::Start { card } => trigger::start(&cli.server, card).await?,
        Commands::Status => trigger::status(&cli.server, cli.format).await?,
        Commands::Store(cmd) => store::execute(cmd, &load_config()?, cli.format).await?,
        Commands::Claim(args) => claim_cmd::execute(args, &load_config()?, cli.format).await?,
        Commands::Version => {
            println!("Vouchflow CLI v{}", vouchflow_common::VERSION);
            println!("Gift voucher checkout automation with OTP rendezvous");
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
