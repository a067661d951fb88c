//! Leaderboard command: top members by total, text or voice XP.

use std::io::Write;

use anyhow::Result;
use lvl_core::{GuildId, UserId};
use lvl_db::{Database, LeaderboardOrder, RankedMember};
use serde::Serialize;

/// One leaderboard row for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub total_xp: i64,
    pub text_xp: i64,
    pub voice_xp: i64,
    pub text_level: u32,
    pub voice_level: u32,
}

impl From<&RankedMember> for LeaderboardEntry {
    fn from(member: &RankedMember) -> Self {
        let progress = &member.progress;
        Self {
            rank: member.rank,
            user_id: progress.user_id,
            total_xp: progress.total_xp(),
            text_xp: progress.text_xp,
            voice_xp: progress.voice_xp,
            text_level: progress.text_level,
            voice_level: progress.voice_level,
        }
    }
}

const fn order_label(order: LeaderboardOrder) -> &'static str {
    match order {
        LeaderboardOrder::Total => "total",
        LeaderboardOrder::Text => "text",
        LeaderboardOrder::Voice => "voice",
    }
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    guild_id: GuildId,
    order: LeaderboardOrder,
    limit: usize,
    json: bool,
) -> Result<()> {
    let members = db.leaderboard(guild_id, order, Some(limit))?;
    let entries: Vec<LeaderboardEntry> = members.iter().map(LeaderboardEntry::from).collect();

    if json {
        serde_json::to_writer_pretty(&mut *writer, &entries)?;
        writeln!(writer)?;
        return Ok(());
    }

    writeln!(
        writer,
        "Leaderboard for guild {guild_id} ({} XP)",
        order_label(order)
    )?;
    if entries.is_empty() {
        writeln!(writer, "No members have earned XP yet.")?;
        return Ok(());
    }
    for entry in entries {
        writeln!(
            writer,
            "#{:<3} user {}  total {}  text {} (L{})  voice {} (L{})",
            entry.rank,
            entry.user_id,
            entry.total_xp,
            entry.text_xp,
            entry.text_level,
            entry.voice_xp,
            entry.voice_level
        )?;
    }
    Ok(())
}
