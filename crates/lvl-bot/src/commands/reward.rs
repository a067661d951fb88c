//! Reward rule management.

use std::io::Write;

use anyhow::{Result, bail};
use lvl_core::{GuildId, LevelReward};
use lvl_db::{Database, NewReward};

fn describe(reward: &LevelReward) -> String {
    let requires = match (reward.required_text_level, reward.required_voice_level) {
        (0, voice) => format!("voice {voice}"),
        (text, 0) => format!("text {text}"),
        (text, voice) => format!("text {text} and voice {voice}"),
    };
    let mut flags = Vec::new();
    if reward.remove_previous {
        flags.push("remove previous");
    }
    if reward.notify_by_dm {
        flags.push("dm");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    format!(
        "#{}  role {}  requires {requires}{flags}",
        reward.id, reward.role_id
    )
}

pub fn add<W: Write>(writer: &mut W, db: &mut Database, reward: &NewReward) -> Result<()> {
    if reward.required_text_level == 0 && reward.required_voice_level == 0 {
        bail!("a reward needs a text level, a voice level, or both");
    }
    let created = db.add_reward(reward)?;
    tracing::info!(guild = %created.guild_id, role = %created.role_id, id = created.id, "reward added");
    writeln!(writer, "Added reward {}", describe(&created))?;
    Ok(())
}

pub fn list<W: Write>(writer: &mut W, db: &Database, guild_id: GuildId) -> Result<()> {
    let rewards = db.list_rewards(guild_id)?;
    if rewards.is_empty() {
        writeln!(writer, "No rewards configured for guild {guild_id}.")?;
        return Ok(());
    }
    writeln!(writer, "Rewards for guild {guild_id}")?;
    for reward in &rewards {
        writeln!(writer, "  {}", describe(reward))?;
    }
    Ok(())
}

pub fn remove<W: Write>(
    writer: &mut W,
    db: &mut Database,
    guild_id: GuildId,
    reward_id: i64,
) -> Result<()> {
    if db.remove_reward(guild_id, reward_id)? {
        writeln!(writer, "Removed reward #{reward_id}")?;
    } else {
        writeln!(writer, "No reward #{reward_id} in guild {guild_id}.")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use lvl_core::RoleId;

    fn new_reward(role: u64, text: u32, voice: u32) -> NewReward {
        NewReward {
            guild_id: GuildId::new(1).unwrap(),
            role_id: RoleId::new(role).unwrap(),
            required_text_level: text,
            required_voice_level: voice,
            remove_previous: false,
            notify_by_dm: false,
        }
    }

    #[test]
    fn add_list_remove() {
        let mut db = Database::open_in_memory().unwrap();
        let guild = GuildId::new(1).unwrap();
        let mut output = Vec::new();

        add(&mut output, &mut db, &new_reward(10, 5, 0)).unwrap();
        add(
            &mut output,
            &mut db,
            &NewReward {
                remove_previous: true,
                notify_by_dm: true,
                ..new_reward(20, 5, 3)
            },
        )
        .unwrap();
        list(&mut output, &db, guild).unwrap();
        remove(&mut output, &mut db, guild, 1).unwrap();
        remove(&mut output, &mut db, guild, 1).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Added reward #1  role 10  requires text 5
        Added reward #2  role 20  requires text 5 and voice 3 [remove previous, dm]
        Rewards for guild 1
          #1  role 10  requires text 5
          #2  role 20  requires text 5 and voice 3 [remove previous, dm]
        Removed reward #1
        No reward #1 in guild 1.
        ");
    }

    #[test]
    fn reward_without_threshold_is_rejected() {
        let mut db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();
        assert!(add(&mut output, &mut db, &new_reward(10, 0, 0)).is_err());
        assert!(db.list_rewards(GuildId::new(1).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn empty_list() {
        let db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();
        list(&mut output, &db, GuildId::new(4).unwrap()).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @"No rewards configured for guild 4.");
    }
}
