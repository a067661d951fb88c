//! Guild settings: show and set.

use std::io::Write;

use anyhow::{Context, Result};
use lvl_core::{GuildId, Setting};
use lvl_db::Database;

pub fn show<W: Write>(writer: &mut W, db: &Database, guild_id: GuildId) -> Result<()> {
    let config = db.guild_config(guild_id)?;
    writeln!(writer, "Settings for guild {guild_id}")?;
    for setting in Setting::ALL {
        writeln!(writer, "  {:<18} {}", setting.as_str(), config.value_of(setting))?;
    }
    Ok(())
}

pub fn set<W: Write>(
    writer: &mut W,
    db: &mut Database,
    guild_id: GuildId,
    setting: &str,
    value: &str,
) -> Result<()> {
    let setting: Setting = setting.parse()?;
    let mut config = db.guild_config(guild_id)?;
    config
        .apply(setting, value)
        .with_context(|| format!("cannot set {setting}"))?;
    db.save_guild_config(&config)?;
    tracing::info!(guild = %guild_id, %setting, "guild setting changed");

    writeln!(writer, "Set {setting} = {}", config.value_of(setting))?;
    Ok(())
}
