//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::import::ImportArgs;
use crate::commands::inspect::InspectArgs;

/// Sleep session importer.
///
/// Reads a device's JSON export of sleep stages, groups the stages into
/// sessions, and records them in the configured store without duplicates.
#[derive(Debug, Parser)]
#[command(name = "somno", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a sleep-stage export into the configured store.
    Import(ImportArgs),

    /// Parse and segment an export without touching any store.
    Inspect(InspectArgs),

    /// List sessions recorded in the local database, newest first.
    Sessions {
        /// Output JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Show the store location and what it holds.
    Status,
}
