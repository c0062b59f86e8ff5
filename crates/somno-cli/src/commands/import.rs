//! Import command: the full pipeline against the configured store.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use clap::Args;

use somno_core::{ImportStats, ImporterConfig};
use somno_db::Database;
use somno_remote::RemoteStore;

use crate::Config;

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Path to the JSON export file.
    pub file: PathBuf,

    /// Reference zone for timestamps without an offset (IANA name,
    /// e.g. Europe/Rome). Overrides the configured zone.
    #[arg(long)]
    pub timezone: Option<Tz>,
}

pub fn run(args: &ImportArgs, config: &Config) -> Result<ImportStats> {
    let payload = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let zone = args.timezone.unwrap_or(config.timezone);
    let importer = ImporterConfig::default();

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;

    let stats = match config.remote_url.as_deref() {
        Some(url) => {
            tracing::debug!(url, "importing into remote store");
            let mut store = RemoteStore::new(url).context("failed to set up remote store")?;
            runtime.block_on(somno_core::import_payload(
                &mut store, &payload, zone, &importer,
            ))
        }
        None => {
            let mut store = open_database(config)?;
            runtime.block_on(somno_core::import_payload(
                &mut store, &payload, zone, &importer,
            ))
        }
    }
    .with_context(|| format!("unreadable payload in {}", args.file.display()))?;

    Ok(stats)
}

/// Opens the local database, ensuring its parent directory exists.
fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}
