//! Status command for a quick look at the configured store.

use std::io::Write;

use anyhow::{Context, Result};

use somno_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    writeln!(writer, "Sleep importer status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(writer, "Reference zone: {}", config.timezone)?;
    writeln!(writer, "Sessions recorded: {}", db.session_count()?)?;

    match db.latest_session_end()? {
        Some(end) => writeln!(
            writer,
            "Latest session end: {}",
            end.format("%Y-%m-%d %H:%M UTC")
        )?,
        None => writeln!(writer, "No sessions recorded yet.")?,
    }

    Ok(())
}
