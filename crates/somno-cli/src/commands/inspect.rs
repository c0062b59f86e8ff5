//! Inspect command: parse and segment an export without storing anything.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use clap::Args;

use somno_core::{parse_entries, parse_payload, segment_intervals};

use crate::Config;

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Path to the JSON export file.
    pub file: PathBuf,

    /// Reference zone for timestamps without an offset (IANA name,
    /// e.g. Europe/Rome). Overrides the configured zone.
    #[arg(long)]
    pub timezone: Option<Tz>,

    /// Output JSON instead of human-readable text.
    #[arg(long)]
    pub json: bool,
}

pub fn run<W: Write>(writer: &mut W, args: &InspectArgs, config: &Config) -> Result<()> {
    let payload = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let entries = parse_payload(&payload)
        .with_context(|| format!("unreadable payload in {}", args.file.display()))?;
    let zone = args.timezone.unwrap_or(config.timezone);

    let parsed = parse_entries(&entries, zone);
    let segmentation = segment_intervals(parsed.intervals);
    let dropped = parsed.skipped + segmentation.skipped;

    if args.json {
        serde_json::to_writer_pretty(&mut *writer, &segmentation.sessions)?;
        writeln!(writer)?;
        return Ok(());
    }

    writeln!(
        writer,
        "{} candidate sessions ({} entries dropped)",
        segmentation.sessions.len(),
        dropped
    )?;
    for (index, session) in segmentation.sessions.iter().enumerate() {
        writeln!(
            writer,
            "{}. {} -> {}  {} stages, {} min",
            index + 1,
            session.start.format("%Y-%m-%d %H:%M"),
            session.end.format("%Y-%m-%d %H:%M"),
            session.stage_count(),
            session.duration().num_minutes()
        )?;
    }
    Ok(())
}
