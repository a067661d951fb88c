//! XP ledger: gatekeeper decisions applied to the store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use lvl_core::gate::{roll_text_xp, should_give_xp, voice_xp};
use lvl_core::{ChannelId, GuildId, GuildLevelConfig, LevelReward, RoleId, UserId, VoiceFlush, XpAxis};
use lvl_db::{Database, DbError, XpAward};
use tracing::{debug, info};

/// Shared handle to the store for the award path.
#[derive(Clone)]
pub struct XpLedger {
    db: Arc<Mutex<Database>>,
}

impl XpLedger {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn config(&self, guild_id: GuildId) -> Result<GuildLevelConfig, DbError> {
        self.db().guild_config(guild_id)
    }

    pub fn rewards(&self, guild_id: GuildId) -> Result<Vec<LevelReward>, DbError> {
        self.db().list_rewards(guild_id)
    }

    /// Awards XP for one message. `None` when the member is exempt, text XP
    /// is disabled, or the cooldown has not elapsed.
    pub fn award_text_xp(
        &self,
        config: &GuildLevelConfig,
        user_id: UserId,
        channel_id: ChannelId,
        roles: &[RoleId],
        now: DateTime<Utc>,
    ) -> Result<Option<XpAward>, DbError> {
        if !should_give_xp(config, XpAxis::Text, roles, channel_id) {
            debug!(guild = %config.guild_id, user = %user_id, channel = %channel_id, "text xp gated");
            return Ok(None);
        }
        let xp = {
            let mut rng = rand::thread_rng();
            roll_text_xp(config, &mut rng)
        };
        let award =
            self.db()
                .award_text_xp(config.guild_id, user_id, xp, config.text_cooldown_secs, now)?;
        match &award {
            Some(award) => info!(
                guild = %config.guild_id,
                user = %user_id,
                xp,
                total = award.progress.text_xp,
                level = award.change.new,
                "text xp awarded"
            ),
            None => debug!(guild = %config.guild_id, user = %user_id, "text xp on cooldown"),
        }
        Ok(award)
    }

    /// Awards XP for a closed voice session. Exemptions apply to the
    /// channel the session was open in.
    pub fn award_voice_xp(
        &self,
        config: &GuildLevelConfig,
        flush: &VoiceFlush,
        now: DateTime<Utc>,
    ) -> Result<Option<XpAward>, DbError> {
        if !should_give_xp(config, XpAxis::Voice, &flush.roles, flush.channel_id) {
            debug!(
                guild = %config.guild_id,
                user = %flush.user_id,
                channel = %flush.channel_id,
                minutes = flush.minutes,
                "voice xp gated"
            );
            return Ok(None);
        }
        let xp = voice_xp(config, flush.minutes);
        let award =
            self.db()
                .award_voice_xp(config.guild_id, flush.user_id, xp, flush.minutes, now)?;
        info!(
            guild = %config.guild_id,
            user = %flush.user_id,
            minutes = flush.minutes,
            xp,
            total = award.progress.voice_xp,
            level = award.change.new,
            "voice xp awarded"
        );
        Ok(Some(award))
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
