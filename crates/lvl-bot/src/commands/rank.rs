//! Rank card command.

use std::io::Write;

use anyhow::Result;
use lvl_core::{GuildId, LevelProgress, UserId, XpAxis};
use lvl_db::Database;

const BAR_LENGTH: i64 = 15;

/// Text progress bar of `BAR_LENGTH` cells, filled in proportion to
/// `current / maximum`. A zero maximum renders full.
pub fn progress_bar(current: i64, maximum: i64) -> String {
    let filled = if maximum <= 0 {
        BAR_LENGTH
    } else {
        current.clamp(0, maximum) * BAR_LENGTH / maximum
    };
    let filled = usize::try_from(filled).unwrap_or_default();
    let empty = usize::try_from(BAR_LENGTH).unwrap_or_default() - filled;
    format!("{}{}", "▓".repeat(filled), "░".repeat(empty))
}

fn axis_line(axis: XpAxis, progress: LevelProgress) -> String {
    let label = format!("{}:", axis.title());
    format!(
        "{label:<6} level {:<3} {}  {}/{} XP, {} to level {}",
        progress.level,
        progress_bar(progress.into_level, progress.level_span),
        progress.into_level,
        progress.level_span,
        progress.remaining,
        progress.level + 1
    )
}

pub fn run<W: Write>(writer: &mut W, db: &Database, guild_id: GuildId, user_id: UserId) -> Result<()> {
    let Some(ranked) = db.rank_of(guild_id, user_id)? else {
        writeln!(writer, "User {user_id} has no XP in guild {guild_id} yet.")?;
        return Ok(());
    };
    let progress = &ranked.progress;

    writeln!(writer, "Rank card for user {user_id} in guild {guild_id}")?;
    writeln!(writer, "Rank: #{}", ranked.rank)?;
    writeln!(writer, "{}", axis_line(XpAxis::Text, progress.progress(XpAxis::Text)))?;
    writeln!(writer, "{}", axis_line(XpAxis::Voice, progress.progress(XpAxis::Voice)))?;
    writeln!(writer, "Total XP: {}", progress.total_xp())?;
    writeln!(
        writer,
        "Activity: {} messages, {} min voice",
        progress.total_messages, progress.total_voice_minutes
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(0, 300), "░".repeat(15));
        assert_eq!(progress_bar(150, 300), format!("{}{}", "▓".repeat(7), "░".repeat(8)));
        assert_eq!(progress_bar(300, 300), "▓".repeat(15));
        assert_eq!(progress_bar(500, 300), "▓".repeat(15));
        assert_eq!(progress_bar(5, 0), "▓".repeat(15));
    }

    #[test]
    fn rank_card() {
        let mut db = Database::open_in_memory().unwrap();
        let guild = GuildId::new(1).unwrap();
        let user = UserId::new(2).unwrap();
        db.set_xp(guild, UserId::new(3).unwrap(), XpAxis::Text, 5_000)
            .unwrap();
        db.set_xp(guild, user, XpAxis::Text, 250).unwrap();
        db.set_xp(guild, user, XpAxis::Voice, 40).unwrap();

        let mut output = Vec::new();
        run(&mut output, &db, guild, user).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Rank card for user 2 in guild 1
        Rank: #2
        Text:  level 1   ▓▓▓▓▓▓▓░░░░░░░░  150/300 XP, 150 to level 2
        Voice: level 0   ▓▓▓▓▓▓░░░░░░░░░  40/100 XP, 60 to level 1
        Total XP: 290
        Activity: 0 messages, 0 min voice
        ");
    }

    #[test]
    fn unknown_member() {
        let db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();
        run(&mut output, &db, GuildId::new(1).unwrap(), UserId::new(9).unwrap()).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @"User 9 has no XP in guild 1 yet.");
    }
}
