//! Storage layer for leveling.
//!
//! Persists member progress, per-guild settings and reward rules using
//! `rusqlite`.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not
//! `Sync`. Share it behind a `Mutex<Database>`.
//!
//! # Schema
//!
//! Snowflake ids are stored as INTEGER. Timestamps are stored as TEXT in
//! RFC 3339 with millisecond precision (e.g. `2024-01-15T10:30:00.000Z`).
//! Exempt role and channel lists are JSON arrays of ids.
//!
//! Every XP write is a read-modify-write inside a `BEGIN IMMEDIATE`
//! transaction, so concurrent writers never lose an increment and readers
//! never observe XP without its matching level.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use lvl_core::gate::can_gain_text_xp;
use lvl_core::{
    ChannelId, GuildId, GuildLevelConfig, LevelChange, LevelReward, MemberProgress, ResetScope,
    RoleId, UserId, XpAxis,
};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp in {column}: {timestamp}")]
    TimestampParse {
        column: &'static str,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored value could not be decoded.
    #[error("invalid data in {column}: {message}")]
    InvalidData {
        column: &'static str,
        message: String,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// Result of a successful XP award.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpAward {
    /// Progress after the award.
    pub progress: MemberProgress,
    pub change: LevelChange,
    pub xp: i64,
}

/// A reward rule to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReward {
    pub guild_id: GuildId,
    pub role_id: RoleId,
    pub required_text_level: u32,
    pub required_voice_level: u32,
    pub remove_previous: bool,
    pub notify_by_dm: bool,
}

/// Sort key for the leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaderboardOrder {
    #[default]
    Total,
    Text,
    Voice,
}

impl LeaderboardOrder {
    const fn order_by(self) -> &'static str {
        match self {
            Self::Total => "(text_xp + voice_xp) DESC, user_id ASC",
            Self::Text => "text_xp DESC, user_id ASC",
            Self::Voice => "voice_xp DESC, user_id ASC",
        }
    }
}

/// A member with their 1-based leaderboard position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedMember {
    pub rank: usize,
    pub progress: MemberProgress,
}

/// Aggregate figures for one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSummary {
    pub guild_id: GuildId,
    pub members: i64,
    pub total_xp: i64,
}

const PROGRESS_COLUMNS: &str = "guild_id, user_id, text_xp, voice_xp, text_level, voice_level, \
    total_messages, total_voice_minutes, last_text_xp_at, last_voice_update_at";

const CONFIG_COLUMNS: &str = "guild_id, text_xp_enabled, voice_xp_enabled, text_xp_min, \
    text_xp_max, voice_xp_rate, text_cooldown_secs, multiplier, exempt_roles, exempt_channels, \
    level_up_messages, level_up_channel_id";

const REWARD_COLUMNS: &str = "id, guild_id, role_id, required_text_level, required_voice_level, \
    remove_previous, notify_by_dm";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- One row per (guild, member). Levels are a cache of the XP columns.
            CREATE TABLE IF NOT EXISTS member_progress (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                text_xp INTEGER NOT NULL DEFAULT 0,
                voice_xp INTEGER NOT NULL DEFAULT 0,
                text_level INTEGER NOT NULL DEFAULT 0,
                voice_level INTEGER NOT NULL DEFAULT 0,
                total_messages INTEGER NOT NULL DEFAULT 0,
                total_voice_minutes INTEGER NOT NULL DEFAULT 0,
                last_text_xp_at TEXT,
                last_voice_update_at TEXT,
                PRIMARY KEY (guild_id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_member_progress_guild ON member_progress(guild_id);

            -- exempt_roles / exempt_channels: JSON arrays of ids
            CREATE TABLE IF NOT EXISTS guild_level_config (
                guild_id INTEGER PRIMARY KEY,
                text_xp_enabled INTEGER NOT NULL,
                voice_xp_enabled INTEGER NOT NULL,
                text_xp_min INTEGER NOT NULL,
                text_xp_max INTEGER NOT NULL,
                voice_xp_rate INTEGER NOT NULL,
                text_cooldown_secs INTEGER NOT NULL,
                multiplier REAL NOT NULL,
                exempt_roles TEXT NOT NULL DEFAULT '[]',
                exempt_channels TEXT NOT NULL DEFAULT '[]',
                level_up_messages INTEGER NOT NULL,
                level_up_channel_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS level_rewards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                role_id INTEGER NOT NULL,
                required_text_level INTEGER NOT NULL DEFAULT 0,
                required_voice_level INTEGER NOT NULL DEFAULT 0,
                remove_previous INTEGER NOT NULL DEFAULT 0,
                notify_by_dm INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_level_rewards_guild ON level_rewards(guild_id);
            ",
        )?;
        Ok(())
    }

    /// Returns the guild's settings, storing the defaults on first access.
    pub fn guild_config(&self, guild_id: GuildId) -> Result<GuildLevelConfig, DbError> {
        let defaults = GuildLevelConfig::new(guild_id);
        let created = write_config(
            &self.conn,
            &format!(
                "INSERT OR IGNORE INTO guild_level_config ({CONFIG_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            &defaults,
        )?;
        if created > 0 {
            debug!(guild = %guild_id, "created default level config");
        }

        let row = self.conn.query_row(
            &format!("SELECT {CONFIG_COLUMNS} FROM guild_level_config WHERE guild_id = ?1"),
            [guild_id],
            ConfigRow::from_row,
        )?;
        row.into_config()
    }

    /// Stores the guild's settings, replacing any previous row.
    pub fn save_guild_config(&mut self, config: &GuildLevelConfig) -> Result<(), DbError> {
        write_config(
            &self.conn,
            &format!(
                "
                INSERT INTO guild_level_config ({CONFIG_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(guild_id) DO UPDATE SET
                    text_xp_enabled = excluded.text_xp_enabled,
                    voice_xp_enabled = excluded.voice_xp_enabled,
                    text_xp_min = excluded.text_xp_min,
                    text_xp_max = excluded.text_xp_max,
                    voice_xp_rate = excluded.voice_xp_rate,
                    text_cooldown_secs = excluded.text_cooldown_secs,
                    multiplier = excluded.multiplier,
                    exempt_roles = excluded.exempt_roles,
                    exempt_channels = excluded.exempt_channels,
                    level_up_messages = excluded.level_up_messages,
                    level_up_channel_id = excluded.level_up_channel_id
                "
            ),
            config,
        )?;
        Ok(())
    }

    /// Lists the guild's reward rules, lowest combined threshold first.
    pub fn list_rewards(&self, guild_id: GuildId) -> Result<Vec<LevelReward>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT {REWARD_COLUMNS}
            FROM level_rewards
            WHERE guild_id = ?1
            ORDER BY required_text_level + required_voice_level ASC, id ASC
            "
        ))?;
        let rows = stmt.query_map([guild_id], reward_from_row)?;
        let mut rewards = Vec::new();
        for row in rows {
            rewards.push(row?);
        }
        Ok(rewards)
    }

    /// Inserts a reward rule and returns it with its assigned id.
    pub fn add_reward(&mut self, reward: &NewReward) -> Result<LevelReward, DbError> {
        self.conn.execute(
            "
            INSERT INTO level_rewards
                (guild_id, role_id, required_text_level, required_voice_level, remove_previous, notify_by_dm)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                reward.guild_id,
                reward.role_id,
                reward.required_text_level,
                reward.required_voice_level,
                reward.remove_previous,
                reward.notify_by_dm,
            ],
        )?;
        Ok(LevelReward {
            id: self.conn.last_insert_rowid(),
            guild_id: reward.guild_id,
            role_id: reward.role_id,
            required_text_level: reward.required_text_level,
            required_voice_level: reward.required_voice_level,
            remove_previous: reward.remove_previous,
            notify_by_dm: reward.notify_by_dm,
        })
    }

    /// Deletes a reward rule. Returns whether a row was removed.
    pub fn remove_reward(&mut self, guild_id: GuildId, reward_id: i64) -> Result<bool, DbError> {
        let removed = self.conn.execute(
            "DELETE FROM level_rewards WHERE guild_id = ?1 AND id = ?2",
            params![guild_id, reward_id],
        )?;
        Ok(removed > 0)
    }

    /// Loads a member's progress, if they have earned anything.
    pub fn progress(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<MemberProgress>, DbError> {
        load_progress(&self.conn, guild_id, user_id)
    }

    /// Whether the member is outside the text XP cooldown at `now`.
    pub fn can_gain_text_xp(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        cooldown_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let last = self
            .progress(guild_id, user_id)?
            .and_then(|progress| progress.last_text_xp_at);
        Ok(can_gain_text_xp(last, cooldown_secs, now))
    }

    /// Awards text XP unless the member is still on cooldown.
    ///
    /// The cooldown check and the increment run in one transaction, so two
    /// messages racing for the same window award at most once.
    pub fn award_text_xp(
        &mut self,
        guild_id: GuildId,
        user_id: UserId,
        xp: i64,
        cooldown_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<XpAward>, DbError> {
        let (progress, change) = self.update_member(guild_id, user_id, |progress| {
            can_gain_text_xp(progress.last_text_xp_at, cooldown_secs, now)
                .then(|| progress.add_text_xp(xp, now))
        })?;
        Ok(change.map(|change| XpAward {
            progress,
            change,
            xp,
        }))
    }

    /// Awards voice XP for a closed session of `minutes` whole minutes.
    pub fn award_voice_xp(
        &mut self,
        guild_id: GuildId,
        user_id: UserId,
        xp: i64,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<XpAward, DbError> {
        let (progress, change) = self.update_member(guild_id, user_id, |progress| {
            progress.add_voice_xp(xp, minutes, now)
        })?;
        Ok(XpAward {
            progress,
            change,
            xp,
        })
    }

    /// Overwrites a member's XP on one axis.
    pub fn set_xp(
        &mut self,
        guild_id: GuildId,
        user_id: UserId,
        axis: XpAxis,
        xp: i64,
    ) -> Result<LevelChange, DbError> {
        let (_, change) =
            self.update_member(guild_id, user_id, |progress| progress.set_xp(axis, xp))?;
        Ok(change)
    }

    /// Sets a member's level on one axis, writing the threshold XP.
    pub fn set_level(
        &mut self,
        guild_id: GuildId,
        user_id: UserId,
        axis: XpAxis,
        level: u32,
    ) -> Result<LevelChange, DbError> {
        let (_, change) =
            self.update_member(guild_id, user_id, |progress| progress.set_level(axis, level))?;
        Ok(change)
    }

    /// Clears a member's progress. A full reset deletes the row.
    pub fn reset(
        &mut self,
        guild_id: GuildId,
        user_id: UserId,
        scope: ResetScope,
    ) -> Result<(), DbError> {
        match scope {
            ResetScope::All => {
                self.conn.execute(
                    "DELETE FROM member_progress WHERE guild_id = ?1 AND user_id = ?2",
                    params![guild_id, user_id],
                )?;
            }
            ResetScope::Axis(_) => {
                self.update_member(guild_id, user_id, |progress| progress.reset(scope))?;
            }
        }
        Ok(())
    }

    /// Members of a guild in leaderboard order.
    pub fn leaderboard(
        &self,
        guild_id: GuildId,
        order: LeaderboardOrder,
        limit: Option<usize>,
    ) -> Result<Vec<RankedMember>, DbError> {
        let limit = limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT {PROGRESS_COLUMNS}
            FROM member_progress
            WHERE guild_id = ?1
            ORDER BY {}
            LIMIT ?2
            ",
            order.order_by()
        ))?;
        let rows = stmt.query_map(params![guild_id, limit], ProgressRow::from_row)?;
        let mut members = Vec::new();
        for (index, row) in rows.enumerate() {
            members.push(RankedMember {
                rank: index + 1,
                progress: row?.into_progress()?,
            });
        }
        Ok(members)
    }

    /// A member's position in the guild's total-XP ordering.
    pub fn rank_of(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<RankedMember>, DbError> {
        let Some(progress) = self.progress(guild_id, user_id)? else {
            return Ok(None);
        };
        let ahead: i64 = self.conn.query_row(
            "
            SELECT COUNT(*)
            FROM member_progress
            WHERE guild_id = ?1
              AND ((text_xp + voice_xp) > ?2 OR ((text_xp + voice_xp) = ?2 AND user_id < ?3))
            ",
            params![guild_id, progress.total_xp(), user_id],
            |row| row.get(0),
        )?;
        let ahead = usize::try_from(ahead).map_err(|err| DbError::InvalidData {
            column: "member_progress",
            message: err.to_string(),
        })?;
        Ok(Some(RankedMember {
            rank: ahead + 1,
            progress,
        }))
    }

    /// Per-guild member counts and XP totals.
    pub fn guild_summaries(&self) -> Result<Vec<GuildSummary>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT guild_id, COUNT(*), COALESCE(SUM(text_xp + voice_xp), 0)
            FROM member_progress
            GROUP BY guild_id
            ORDER BY guild_id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(GuildSummary {
                guild_id: row.get(0)?,
                members: row.get(1)?,
                total_xp: row.get(2)?,
            })
        })?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    /// Loads (or starts) a member's progress, applies `update` and writes
    /// the row back if anything changed, all in one immediate transaction.
    fn update_member<T>(
        &mut self,
        guild_id: GuildId,
        user_id: UserId,
        update: impl FnOnce(&mut MemberProgress) -> T,
    ) -> Result<(MemberProgress, T), DbError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let before = load_progress(&tx, guild_id, user_id)?
            .unwrap_or_else(|| MemberProgress::new(guild_id, user_id));
        let mut progress = before.clone();
        let outcome = update(&mut progress);
        if progress != before {
            store_progress(&tx, &progress)?;
            tx.commit()?;
        }
        Ok((progress, outcome))
    }
}

fn load_progress(
    conn: &Connection,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<Option<MemberProgress>, DbError> {
    conn.query_row(
        &format!(
            "SELECT {PROGRESS_COLUMNS} FROM member_progress WHERE guild_id = ?1 AND user_id = ?2"
        ),
        params![guild_id, user_id],
        ProgressRow::from_row,
    )
    .optional()?
    .map(ProgressRow::into_progress)
    .transpose()
}

fn store_progress(conn: &Connection, progress: &MemberProgress) -> Result<(), DbError> {
    conn.execute(
        &format!(
            "
            INSERT INTO member_progress ({PROGRESS_COLUMNS})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(guild_id, user_id) DO UPDATE SET
                text_xp = excluded.text_xp,
                voice_xp = excluded.voice_xp,
                text_level = excluded.text_level,
                voice_level = excluded.voice_level,
                total_messages = excluded.total_messages,
                total_voice_minutes = excluded.total_voice_minutes,
                last_text_xp_at = excluded.last_text_xp_at,
                last_voice_update_at = excluded.last_voice_update_at
            "
        ),
        params![
            progress.guild_id,
            progress.user_id,
            progress.text_xp,
            progress.voice_xp,
            progress.text_level,
            progress.voice_level,
            progress.total_messages,
            progress.total_voice_minutes,
            progress.last_text_xp_at.map(format_timestamp),
            progress.last_voice_update_at.map(format_timestamp),
        ],
    )?;
    Ok(())
}

/// A `member_progress` row with its timestamps still undecoded.
struct ProgressRow {
    progress: MemberProgress,
    last_text_xp_at: Option<String>,
    last_voice_update_at: Option<String>,
}

impl ProgressRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut progress = MemberProgress::new(row.get(0)?, row.get(1)?);
        progress.text_xp = row.get(2)?;
        progress.voice_xp = row.get(3)?;
        progress.text_level = row.get(4)?;
        progress.voice_level = row.get(5)?;
        progress.total_messages = row.get(6)?;
        progress.total_voice_minutes = row.get(7)?;
        Ok(Self {
            progress,
            last_text_xp_at: row.get(8)?,
            last_voice_update_at: row.get(9)?,
        })
    }

    fn into_progress(self) -> Result<MemberProgress, DbError> {
        let mut progress = self.progress;
        progress.last_text_xp_at = self
            .last_text_xp_at
            .as_deref()
            .map(|timestamp| parse_timestamp(timestamp, "last_text_xp_at"))
            .transpose()?;
        progress.last_voice_update_at = self
            .last_voice_update_at
            .as_deref()
            .map(|timestamp| parse_timestamp(timestamp, "last_voice_update_at"))
            .transpose()?;
        Ok(progress)
    }
}

/// A `guild_level_config` row with its id lists still undecoded.
struct ConfigRow {
    config: GuildLevelConfig,
    exempt_roles: String,
    exempt_channels: String,
}

impl ConfigRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut config = GuildLevelConfig::new(row.get(0)?);
        config.text_xp_enabled = row.get(1)?;
        config.voice_xp_enabled = row.get(2)?;
        config.text_xp_min = row.get(3)?;
        config.text_xp_max = row.get(4)?;
        config.voice_xp_rate = row.get(5)?;
        config.text_cooldown_secs = row.get(6)?;
        config.multiplier = row.get(7)?;
        config.level_up_messages = row.get(10)?;
        config.level_up_channel = row.get::<_, Option<ChannelId>>(11)?;
        Ok(Self {
            config,
            exempt_roles: row.get(8)?,
            exempt_channels: row.get(9)?,
        })
    }

    fn into_config(self) -> Result<GuildLevelConfig, DbError> {
        let mut config = self.config;
        config.exempt_roles = decode_ids(&self.exempt_roles, "exempt_roles")?;
        config.exempt_channels = decode_ids(&self.exempt_channels, "exempt_channels")?;
        Ok(config)
    }
}

fn write_config(conn: &Connection, sql: &str, config: &GuildLevelConfig) -> Result<usize, DbError> {
    let exempt_roles = encode_ids(&config.exempt_roles, "exempt_roles")?;
    let exempt_channels = encode_ids(&config.exempt_channels, "exempt_channels")?;
    let written = conn.execute(
        sql,
        params![
            config.guild_id,
            config.text_xp_enabled,
            config.voice_xp_enabled,
            config.text_xp_min,
            config.text_xp_max,
            config.voice_xp_rate,
            config.text_cooldown_secs,
            config.multiplier,
            exempt_roles,
            exempt_channels,
            config.level_up_messages,
            config.level_up_channel,
        ],
    )?;
    Ok(written)
}

fn reward_from_row(row: &Row<'_>) -> rusqlite::Result<LevelReward> {
    Ok(LevelReward {
        id: row.get(0)?,
        guild_id: row.get(1)?,
        role_id: row.get(2)?,
        required_text_level: row.get(3)?,
        required_voice_level: row.get(4)?,
        remove_previous: row.get(5)?,
        notify_by_dm: row.get(6)?,
    })
}

fn encode_ids<T: Serialize>(ids: &[T], column: &'static str) -> Result<String, DbError> {
    serde_json::to_string(ids).map_err(|err| DbError::InvalidData {
        column,
        message: err.to_string(),
    })
}

fn decode_ids<T: DeserializeOwned>(raw: &str, column: &'static str) -> Result<Vec<T>, DbError> {
    serde_json::from_str(raw).map_err(|err| DbError::InvalidData {
        column,
        message: err.to_string(),
    })
}

fn parse_timestamp(timestamp: &str, column: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            column,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
