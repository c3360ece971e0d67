//! Zerda bot process
//!
//! # Usage
//!
//! ```bash
//! # Run the bot, reading gateway events from a bridge on stdin
//! gateway-bridge | ZERDA_TOKEN=... zerda
//!
//! # Inspect the store without connecting
//! zerda stats
//! zerda apps --guild 123456789012345678
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reconciler::{GuildId, Reconciler, StateStore};
use tokio::io::BufReader;
use tracing::info;
use zerda::{logging, run_event_loop, Bot, BotConfig, GuildCache, HttpDirectory};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file overriding environment configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot (default)
    Run,
    /// Print tracked-app and assignment stats
    Stats,
    /// List the apps tracked in one guild
    Apps {
        /// Guild ID
        #[arg(long)]
        guild: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = BotConfig::load(args.config.as_deref())?;
    logging::init(config.log_file.as_deref())?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Stats => {
            let store = open_store(&config)?;
            let stats = store.stats()?;
            println!("Servers with tracked apps: {}", stats.guilds);
            println!("Applications tracked:      {}", stats.apps);
            println!("Total role assignments:    {}", stats.assignments);
            Ok(())
        }
        Command::Apps { guild } => {
            let guild = GuildId::parse(&guild)?;
            let store = open_store(&config)?;
            let mut apps: Vec<_> = store.list_apps(guild)?.into_iter().collect();
            apps.sort();
            if apps.is_empty() {
                println!("No apps tracked in guild {guild}");
            }
            for app in apps {
                println!("{app}");
            }
            Ok(())
        }
    }
}

fn open_store(config: &BotConfig) -> Result<StateStore> {
    StateStore::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open state store at {}",
            config.database_path.display()
        )
    })
}

async fn run(config: BotConfig) -> Result<()> {
    let token = config.require_token()?;
    info!(?config, "Zerda starting");

    let store = open_store(&config)?.shared();
    let cache = GuildCache::new().shared();
    let directory = Arc::new(
        HttpDirectory::new(config.api_base.clone(), token, cache.clone())
            .context("Failed to create HTTP client")?,
    );
    let engine = Reconciler::new(directory.clone(), store, config.reconciler.clone()).shared();
    let bot = Bot::new(engine, cache, directory.clone(), directory).shared();

    info!("Waiting for gateway events on stdin");
    run_event_loop(
        bot,
        BufReader::new(tokio::io::stdin()),
        config.sweep_interval(),
    )
    .await
}
