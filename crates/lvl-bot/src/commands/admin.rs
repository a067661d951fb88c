//! Administrative overrides of member progress.
//!
//! Overrides only write the store. They never dispatch rewards or
//! announcements.

use std::io::Write;

use anyhow::Result;
use lvl_core::{GuildId, LevelChange, ResetScope, UserId, XpAxis};
use lvl_db::Database;

fn describe_change(change: LevelChange) -> String {
    if change.old == change.new {
        format!("{} level stays {}", change.axis.title(), change.new)
    } else {
        format!(
            "{} level {} -> {}",
            change.axis.title(),
            change.old,
            change.new
        )
    }
}

pub fn set_xp<W: Write>(
    writer: &mut W,
    db: &mut Database,
    guild_id: GuildId,
    user_id: UserId,
    axis: XpAxis,
    amount: i64,
) -> Result<()> {
    let change = db.set_xp(guild_id, user_id, axis, amount)?;
    tracing::info!(guild = %guild_id, user = %user_id, %axis, amount, "xp overridden");
    writeln!(
        writer,
        "Set {axis} XP of user {user_id} to {amount} ({})",
        describe_change(change)
    )?;
    Ok(())
}

pub fn set_level<W: Write>(
    writer: &mut W,
    db: &mut Database,
    guild_id: GuildId,
    user_id: UserId,
    axis: XpAxis,
    level: u32,
) -> Result<()> {
    let change = db.set_level(guild_id, user_id, axis, level)?;
    tracing::info!(guild = %guild_id, user = %user_id, %axis, level, "level overridden");
    writeln!(
        writer,
        "Set {axis} level of user {user_id} to {level} ({})",
        describe_change(change)
    )?;
    Ok(())
}

pub fn reset<W: Write>(
    writer: &mut W,
    db: &mut Database,
    guild_id: GuildId,
    user_id: UserId,
    scope: ResetScope,
) -> Result<()> {
    db.reset(guild_id, user_id, scope)?;
    tracing::info!(guild = %guild_id, user = %user_id, ?scope, "progress reset");
    match scope {
        ResetScope::All => writeln!(writer, "Reset all progress of user {user_id}")?,
        ResetScope::Axis(axis) => writeln!(writer, "Reset {axis} progress of user {user_id}")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    #[test]
    fn overrides_report_level_changes() {
        let mut db = Database::open_in_memory().unwrap();
        let guild = GuildId::new(1).unwrap();
        let user = UserId::new(2).unwrap();
        let mut output = Vec::new();

        set_xp(&mut output, &mut db, guild, user, XpAxis::Text, 450).unwrap();
        set_level(&mut output, &mut db, guild, user, XpAxis::Text, 1).unwrap();
        set_level(&mut output, &mut db, guild, user, XpAxis::Voice, 0).unwrap();
        reset(&mut output, &mut db, guild, user, ResetScope::Axis(XpAxis::Text)).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Set text XP of user 2 to 450 (Text level 0 -> 2)
        Set text level of user 2 to 1 (Text level 2 -> 1)
        Set voice level of user 2 to 0 (Voice level stays 0)
        Reset text progress of user 2
        ");
        let progress = db.progress(guild, user).unwrap().unwrap();
        assert_eq!(progress.text_xp, 0);
    }

    #[test]
    fn full_reset_removes_member() {
        let mut db = Database::open_in_memory().unwrap();
        let guild = GuildId::new(1).unwrap();
        let user = UserId::new(2).unwrap();
        db.set_xp(guild, user, XpAxis::Voice, 300).unwrap();

        let mut output = Vec::new();
        reset(&mut output, &mut db, guild, user, ResetScope::All).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @"Reset all progress of user 2");
        assert!(db.progress(guild, user).unwrap().is_none());
    }
}
