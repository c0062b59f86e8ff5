use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use somno_cli::commands::{import, inspect, sessions, status};
use somno_cli::{Cli, Commands, Config};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

/// Opens the local database, ensuring the parent directory exists.
fn open_database(config: &Config) -> Result<somno_db::Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    somno_db::Database::open(&config.database_path).context("failed to open database")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    match &cli.command {
        Some(Commands::Import(args)) => {
            let config = load_config(cli.config.as_deref())?;
            let stats = import::run(args, &config)?;
            println!(
                "Imported {} sessions, skipped {} stage entries.",
                stats.sessions_imported, stats.stages_skipped
            );
        }
        Some(Commands::Inspect(args)) => {
            let config = load_config(cli.config.as_deref())?;
            inspect::run(&mut io::stdout(), args, &config)?;
        }
        Some(Commands::Sessions { json }) => {
            let config = load_config(cli.config.as_deref())?;
            let db = open_database(&config)?;
            sessions::run(&mut io::stdout(), &db, *json)?;
        }
        Some(Commands::Status) => {
            let config = load_config(cli.config.as_deref())?;
            status::run(&mut io::stdout(), &config)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
