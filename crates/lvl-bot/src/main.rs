use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lvl_bot::commands::{admin, leaderboard, rank, reward, run, settings, status};
use lvl_bot::{Cli, Commands, Config, ConfigAction, RewardAction};
use lvl_db::{Database, NewReward};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

#[expect(
    clippy::too_many_lines,
    reason = "CLI command dispatch is inherently verbose"
)]
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // stdout carries command output; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Some(Commands::Run { input }) => {
            drop(out);
            let (db, config) = open_database(cli.config.as_deref())?;
            run::run(db, &config, input.as_deref()).await?;
        }
        Some(Commands::Leaderboard {
            guild,
            by,
            limit,
            json,
        }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            leaderboard::run(&mut out, &db, guild, by.into(), limit, json)?;
        }
        Some(Commands::Rank { guild, user }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            rank::run(&mut out, &db, guild, user)?;
        }
        Some(Commands::Config(action)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            match action {
                ConfigAction::Show { guild } => settings::show(&mut out, &db, guild)?,
                ConfigAction::Set {
                    guild,
                    setting,
                    value,
                } => settings::set(&mut out, &mut db, guild, &setting, &value)?,
            }
        }
        Some(Commands::Reward(action)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            match action {
                RewardAction::Add {
                    guild,
                    role,
                    text_level,
                    voice_level,
                    remove_previous,
                    notify,
                } => {
                    let new_reward = NewReward {
                        guild_id: guild,
                        role_id: role,
                        required_text_level: text_level,
                        required_voice_level: voice_level,
                        remove_previous,
                        notify_by_dm: notify,
                    };
                    reward::add(&mut out, &mut db, &new_reward)?;
                }
                RewardAction::List { guild } => reward::list(&mut out, &db, guild)?,
                RewardAction::Remove { guild, id } => reward::remove(&mut out, &mut db, guild, id)?,
            }
        }
        Some(Commands::SetXp {
            guild,
            user,
            axis,
            amount,
        }) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            admin::set_xp(&mut out, &mut db, guild, user, axis.into(), amount)?;
        }
        Some(Commands::SetLevel {
            guild,
            user,
            axis,
            level,
        }) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            admin::set_level(&mut out, &mut db, guild, user, axis.into(), level)?;
        }
        Some(Commands::Reset { guild, user, scope }) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            admin::reset(&mut out, &mut db, guild, user, scope.into())?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut out, &db, &config.database_path)?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            writeln!(out)?;
        }
    }

    Ok(())
}
