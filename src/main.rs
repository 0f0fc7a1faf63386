//! Strata server entrypoint.
//!
//! Usage:
//!   strata start --config config/strata.toml
//!   strata start --bind 127.0.0.1:6543 --log-level debug
//!   strata config validate --config config/strata.toml

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata::config::{Config, ConfigOverrides};
use strata::Store;

#[derive(Parser)]
#[command(name = "strata", version, about = "Embeddable key-value store server")]
struct Cli {
    /// Configuration file path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server.
    Start(StartArgs),
    /// Configuration utilities.
    Config(ConfigArgs),
}

#[derive(clap::Args)]
struct StartArgs {
    /// Override the listener bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the log level.
    #[arg(long)]
    log_level: Option<String>,

    /// Override the snapshot directory.
    #[arg(long)]
    data_dir: Option<String>,
}

#[derive(clap::Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Parse and validate a configuration file.
    Validate,
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            let mut config = load_config(&cli.config)?;
            config.apply_overrides(&ConfigOverrides {
                bind: args.bind,
                log_level: args.log_level,
                data_dir: args.data_dir,
            });

            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.telemetry.log_level));
            tracing_subscriber::fmt().with_env_filter(filter).init();

            let bind = config.listener.bind.clone();
            if bind.is_empty() {
                anyhow::bail!("no listener address configured; set listener.bind or pass --bind");
            }
            let addr = bind
                .parse()
                .with_context(|| format!("invalid bind address: {}", bind))?;

            let store = Store::open(config)?;
            let bound = store.start(addr).await?;
            tracing::info!(addr = %bound, "strata serving");

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            store.save_all()?;
            store.stop().await;
            Ok(())
        }
        Commands::Config(args) => match args.command {
            ConfigCommands::Validate => {
                let path = cli
                    .config
                    .context("config validate requires --config <path>")?;
                Config::from_file(&path)?;
                println!("{} is valid", path.display());
                Ok(())
            }
        },
    }
}
