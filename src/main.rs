use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use bond_sync_client::config::{ClientConfig, LoggingConfig};
use bond_sync_client::logging::init_tracing;

#[derive(Parser)]
#[command(author, version, about = "Bond and staking sync client tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a client configuration file
    CheckConfig {
        #[arg(short, long, default_value = "config/client.toml")]
        config: PathBuf,
    },
    /// Write the default configuration, without an address book
    GenerateConfig {
        #[arg(short, long, default_value = "config/client.toml")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::CheckConfig { config } => check_config(config),
        Commands::GenerateConfig { path } => generate_config(path),
    }
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = ClientConfig::load(&path)?;
    init_tracing(&config.logging);
    let network = config.network.default_network;
    info!(
        path = %path.display(),
        %network,
        rpc = config.network.rpc_uri(network),
        bonds = ?config.bonds.enabled,
        "configuration is valid"
    );
    Ok(())
}

fn generate_config(path: PathBuf) -> Result<()> {
    init_tracing(&LoggingConfig::default());
    let rendered = toml::to_string_pretty(&ClientConfig::default())
        .context("unable to render default configuration")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("unable to create {}", parent.display()))?;
    }
    fs::write(&path, rendered).with_context(|| format!("unable to write {}", path.display()))?;
    info!(
        path = %path.display(),
        "wrote default configuration; add an [address_book] section before use"
    );
    Ok(())
}
