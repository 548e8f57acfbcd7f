//! cosmetics-host: console host for the cosmetics core
//!
//! Stands in for a game server: reads session events and player commands
//! from stdin, drives the core, and prints a distinct reply for every
//! outcome. Items and achievements come from a YAML file.

mod console;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use cosmetics_core::{CosmeticsConfig, CosmeticsService, MemoryCreditLedger, StaticPermissions};

use console::{parse_line, Console, Reply};

#[derive(Parser)]
#[command(name = "cosmetics-host")]
#[command(about = "Console host for the cosmetics core")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "cosmetics.yml")]
    config: String,

    /// Data directory (selects the file store)
    #[arg(short, long, env = "COSMETICS_DATA_DIR")]
    data_dir: Option<String>,

    /// Log level (overrides config file)
    #[arg(long, env = "COSMETICS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Credits every new entity starts with
    #[arg(long, default_value_t = 0)]
    starting_credits: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load or create default config
    let config_missing = !Path::new(&cli.config).exists();
    let mut config = if config_missing {
        CosmeticsConfig::default()
    } else {
        CosmeticsConfig::load(&cli.config)?
    };

    // Apply CLI overrides
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.backend = cosmetics_core::config::StorageBackend::File;
        config.storage.data_dir = PathBuf::from(data_dir);
    }

    // Initialize tracing
    let level = config.general.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("cosmetics_core={}", level).parse()?)
                .add_directive(format!("cosmetics_host={}", level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting cosmetics-host");
    if config_missing {
        warn!(path = %cli.config, "Config file not found, using defaults");
    }

    let permissions = Arc::new(StaticPermissions::new());
    let credits = Arc::new(MemoryCreditLedger::new().with_starting_balance(cli.starting_credits));
    let service = CosmeticsService::builder(config)
        .with_permissions(permissions.clone())
        .with_credits(credits)
        .build()
        .await?;

    info!(
        items = service.catalog.snapshot().count(),
        backend = ?service.config.storage.backend,
        "Ready, type `help` for commands"
    );

    let console = Console::new(service, permissions);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        let command = match parse_line(&line) {
            None => continue,
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                println!("{}", e.render());
                continue;
            }
        };

        match console.execute(command).await {
            Ok(Reply::Print(text)) => println!("{}", text),
            Ok(Reply::Quit) => break,
            Err(e) => println!("Error: {:#}", e),
        }
    }

    console.service().shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
