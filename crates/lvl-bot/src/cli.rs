//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use lvl_core::{GuildId, ResetScope, RoleId, UserId, XpAxis};
use lvl_db::LeaderboardOrder;

/// Leveling engine for community chat servers.
///
/// Awards XP for text and voice activity, derives levels and hands out
/// reward roles.
#[derive(Debug, Parser)]
#[command(name = "lvl", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Process platform events given as JSON lines.
    ///
    /// Collaborator actions (role edits, messages) are printed to stdout as
    /// JSON lines.
    Run {
        /// Read events from this file instead of stdin.
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Show the top members of a guild.
    Leaderboard {
        #[arg(long)]
        guild: GuildId,

        /// Which XP to rank by.
        #[arg(long, value_enum, default_value_t = RankBy::Total)]
        by: RankBy,

        /// Number of members to show.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a member's rank card.
    Rank {
        #[arg(long)]
        guild: GuildId,

        #[arg(long)]
        user: UserId,
    },

    /// Show or edit guild leveling settings.
    #[command(subcommand)]
    Config(ConfigAction),

    /// Manage level reward roles.
    #[command(subcommand)]
    Reward(RewardAction),

    /// Overwrite a member's XP.
    SetXp {
        #[arg(long)]
        guild: GuildId,

        #[arg(long)]
        user: UserId,

        #[arg(long, value_enum)]
        axis: Axis,

        /// New XP total; must not be negative.
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
        amount: i64,
    },

    /// Set a member's level (writes the level's XP threshold).
    SetLevel {
        #[arg(long)]
        guild: GuildId,

        #[arg(long)]
        user: UserId,

        #[arg(long, value_enum)]
        axis: Axis,

        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=100))]
        level: u32,
    },

    /// Reset a member's progress.
    Reset {
        #[arg(long)]
        guild: GuildId,

        #[arg(long)]
        user: UserId,

        #[arg(long, value_enum, default_value_t = Scope::All)]
        scope: Scope,
    },

    /// Show database location and per-guild totals.
    Status,
}

/// Guild settings actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print every setting.
    Show {
        #[arg(long)]
        guild: GuildId,
    },
    /// Change one setting.
    Set {
        #[arg(long)]
        guild: GuildId,

        /// Setting name, e.g. `text_cooldown` or `exempt_roles`.
        setting: String,

        /// New value. Lists are comma separated; `none` clears.
        value: String,
    },
}

/// Reward rule actions.
#[derive(Debug, Subcommand)]
pub enum RewardAction {
    /// Add a reward rule.
    Add {
        #[arg(long)]
        guild: GuildId,

        #[arg(long)]
        role: RoleId,

        /// Required text level; 0 means not required.
        #[arg(long, default_value_t = 0)]
        text_level: u32,

        /// Required voice level; 0 means not required.
        #[arg(long, default_value_t = 0)]
        voice_level: u32,

        /// Revoke lower reward roles when granting this one.
        #[arg(long)]
        remove_previous: bool,

        /// Tell the member by direct message.
        #[arg(long)]
        notify: bool,
    },
    /// List reward rules.
    List {
        #[arg(long)]
        guild: GuildId,
    },
    /// Remove a reward rule by id.
    Remove {
        #[arg(long)]
        guild: GuildId,

        id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RankBy {
    Total,
    Text,
    Voice,
}

impl From<RankBy> for LeaderboardOrder {
    fn from(by: RankBy) -> Self {
        match by {
            RankBy::Total => Self::Total,
            RankBy::Text => Self::Text,
            RankBy::Voice => Self::Voice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Axis {
    Text,
    Voice,
}

impl From<Axis> for XpAxis {
    fn from(axis: Axis) -> Self {
        match axis {
            Axis::Text => Self::Text,
            Axis::Voice => Self::Voice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scope {
    All,
    Text,
    Voice,
}

impl From<Scope> for ResetScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::All => Self::All,
            Scope::Text => Self::Axis(XpAxis::Text),
            Scope::Voice => Self::Axis(XpAxis::Voice),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn set_level_is_capped_at_one_hundred() {
        let parsed = Cli::try_parse_from([
            "lvl", "set-level", "--guild", "1", "--user", "2", "--axis", "text", "--level", "101",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn set_xp_rejects_negative_amounts() {
        let args = ["lvl", "set-xp", "--guild", "1", "--user", "2", "--axis", "text", "--amount"];
        let negative = Cli::try_parse_from(args.iter().copied().chain(["-5"]));
        assert!(negative.is_err());

        let parsed = Cli::try_parse_from(args.iter().copied().chain(["0"])).unwrap();
        assert!(matches!(parsed.command, Some(Commands::SetXp { amount: 0, .. })));
    }

    #[test]
    fn zero_ids_are_rejected() {
        let parsed = Cli::try_parse_from(["lvl", "rank", "--guild", "0", "--user", "2"]);
        assert!(parsed.is_err());
    }
}
