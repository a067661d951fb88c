//! Status command for showing where data lives and per-guild totals.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use lvl_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, database_path: &Path) -> Result<()> {
    let summaries = db.guild_summaries()?;

    writeln!(writer, "Leveling status")?;
    writeln!(writer, "Database: {}", database_path.display())?;

    if summaries.is_empty() {
        writeln!(writer, "No XP recorded.")?;
        return Ok(());
    }

    writeln!(writer, "Guilds:")?;
    for summary in summaries {
        writeln!(
            writer,
            "- {}: {} members, {} XP",
            summary.guild_id, summary.members, summary.total_xp
        )?;
    }

    Ok(())
}
