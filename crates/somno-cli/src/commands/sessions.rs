//! Sessions command: list what the database currently holds.

use std::io::Write;

use anyhow::Result;

use somno_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, json: bool) -> Result<()> {
    let sessions = db.list_sessions()?;

    if json {
        serde_json::to_writer_pretty(&mut *writer, &sessions)?;
        writeln!(writer)?;
        return Ok(());
    }

    if sessions.is_empty() {
        writeln!(writer, "No sessions recorded.")?;
        return Ok(());
    }

    for session in &sessions {
        let short_id = session.id.get(..8).unwrap_or(&session.id);
        writeln!(
            writer,
            "{}  {} -> {}  {} stages",
            short_id,
            session.start.format("%Y-%m-%d %H:%M"),
            session.end.format("%Y-%m-%d %H:%M"),
            session.stage_count
        )?;
    }
    Ok(())
}
