//! Event ingest: routes platform events through the tracker, ledger and
//! reward dispatcher.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use lvl_core::{
    ChannelId, GuildId, GuildLevelConfig, Inbound, LevelReward, RoleId, UserId, VoiceChannelState,
    VoiceFlush, VoiceMember, VoiceTransition,
};
use lvl_db::{Database, DbError, XpAward};
use thiserror::Error;
use tracing::{debug, warn};

use crate::dispatch::{Announce, DispatchReport, RewardDispatcher};
use crate::ledger::XpLedger;
use crate::platform::{Notifier, PlatformError, VoiceDirectory};
use crate::tracker::VoiceTracker;

/// Failures that abandon a whole event.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] DbError),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// What handling one event did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub awards: Vec<XpAward>,
    pub dispatch: DispatchReport,
    /// Per-member failures that were logged and skipped.
    pub failures: usize,
}

impl EventOutcome {
    fn merge(&mut self, other: Self) {
        self.awards.extend(other.awards);
        self.dispatch.merge(other.dispatch);
        self.failures += other.failures;
    }
}

/// Most recently active text channel per guild.
#[derive(Debug, Default)]
pub struct ActivityChannels {
    channels: Mutex<HashMap<GuildId, ChannelId>>,
}

impl ActivityChannels {
    pub fn record(&self, guild_id: GuildId, channel_id: ChannelId) {
        lock(&self.channels).insert(guild_id, channel_id);
    }

    pub fn last(&self, guild_id: GuildId) -> Option<ChannelId> {
        lock(&self.channels).get(&guild_id).copied()
    }

    pub fn forget(&self, guild_id: GuildId) {
        lock(&self.channels).remove(&guild_id);
    }
}

/// Role edits the engine made itself, per member.
///
/// Role lists carried by platform events (message authors, voice occupants)
/// can predate a grant made moments earlier, so they are overlaid with
/// these edits before rewards are planned.
#[derive(Debug, Default)]
pub struct KnownRoles {
    edits: Mutex<HashMap<(GuildId, UserId), BTreeMap<RoleId, bool>>>,
}

impl KnownRoles {
    /// Roles the member holds: `observed` with the engine's own edits applied.
    pub fn held(&self, guild_id: GuildId, user_id: UserId, observed: &[RoleId]) -> Vec<RoleId> {
        let mut held: BTreeSet<RoleId> = observed.iter().copied().collect();
        if let Some(edits) = lock(&self.edits).get(&(guild_id, user_id)) {
            for (role_id, granted) in edits {
                if *granted {
                    held.insert(*role_id);
                } else {
                    held.remove(role_id);
                }
            }
        }
        held.into_iter().collect()
    }

    pub fn record(&self, guild_id: GuildId, user_id: UserId, report: &DispatchReport) {
        if report.granted.is_empty() && report.revoked.is_empty() {
            return;
        }
        let mut edits = lock(&self.edits);
        let member = edits.entry((guild_id, user_id)).or_default();
        for role_id in &report.revoked {
            member.insert(*role_id, false);
        }
        for role_id in &report.granted {
            member.insert(*role_id, true);
        }
    }

    pub fn forget(&self, guild_id: GuildId) {
        lock(&self.edits).retain(|(guild, _), _| *guild != guild_id);
    }
}

pub struct Engine {
    ledger: XpLedger,
    tracker: VoiceTracker,
    dispatcher: RewardDispatcher,
    directory: Arc<dyn VoiceDirectory>,
    activity: ActivityChannels,
    roles: KnownRoles,
    departed: Mutex<HashSet<GuildId>>,
}

impl Engine {
    pub fn new(
        db: Database,
        notifier: Arc<dyn Notifier>,
        directory: Arc<dyn VoiceDirectory>,
    ) -> Self {
        Self {
            ledger: XpLedger::new(db),
            tracker: VoiceTracker::new(),
            dispatcher: RewardDispatcher::new(notifier),
            directory,
            activity: ActivityChannels::default(),
            roles: KnownRoles::default(),
            departed: Mutex::new(HashSet::new()),
        }
    }

    pub const fn tracker(&self) -> &VoiceTracker {
        &self.tracker
    }

    pub const fn activity(&self) -> &ActivityChannels {
        &self.activity
    }

    pub const fn roles(&self) -> &KnownRoles {
        &self.roles
    }

    pub async fn handle(&self, event: Inbound) -> Result<EventOutcome, EngineError> {
        self.handle_at(event, Utc::now()).await
    }

    /// Handles one event as if it happened at `now`.
    pub async fn handle_at(
        &self,
        event: Inbound,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, EngineError> {
        if let Some(guild_id) = event.guild_id() {
            let rejoined = matches!(event, Inbound::GuildAvailable { .. });
            if !rejoined && self.has_departed(guild_id) {
                debug!(guild = %guild_id, "event for departed guild ignored");
                return Ok(EventOutcome::default());
            }
        }

        match event {
            Inbound::MessageSent {
                guild_id,
                user_id,
                channel_id,
                is_bot,
                roles,
            } => {
                if is_bot {
                    return Ok(EventOutcome::default());
                }
                self.message_received(guild_id, user_id, channel_id, &roles, now)
                    .await
            }
            Inbound::VoiceStateChanged {
                guild_id,
                member,
                before,
                after,
            } => {
                self.voice_state_changed(guild_id, &member, before.as_ref(), after.as_ref(), now)
                    .await
            }
            Inbound::GuildAvailable {
                guild_id,
                voice_channels,
            } => {
                lock(&self.departed).remove(&guild_id);
                let flushes = self.tracker.periodic_scan(guild_id, &voice_channels, now);
                self.award_flushes(guild_id, flushes, now).await
            }
            Inbound::GuildRemoved { guild_id } => {
                lock(&self.departed).insert(guild_id);
                self.tracker.forget_guild(guild_id);
                self.activity.forget(guild_id);
                self.roles.forget(guild_id);
                Ok(EventOutcome::default())
            }
            Inbound::Scan => self.periodic_scan(now).await,
        }
    }

    /// Text activity: gate, award, then dispatch on level-up.
    pub async fn message_received(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
        roles: &[RoleId],
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, EngineError> {
        self.activity.record(guild_id, channel_id);
        let config = self.ledger.config(guild_id)?;
        let Some(award) = self
            .ledger
            .award_text_xp(&config, user_id, channel_id, roles, now)?
        else {
            return Ok(EventOutcome::default());
        };

        let mut outcome = EventOutcome::default();
        if award.change.is_level_up() {
            let rewards = self.ledger.rewards(guild_id)?;
            let held = self.roles.held(guild_id, user_id, roles);
            outcome.dispatch = self
                .dispatcher
                .dispatch(&config, &rewards, &award, &held, self.announce(&config))
                .await;
            self.roles.record(guild_id, user_id, &outcome.dispatch);
        }
        outcome.awards.push(award);
        Ok(outcome)
    }

    /// Voice activity: classify, update presence, award closed sessions.
    pub async fn voice_state_changed(
        &self,
        guild_id: GuildId,
        member: &VoiceMember,
        before: Option<&VoiceChannelState>,
        after: Option<&VoiceChannelState>,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, EngineError> {
        let flushes = match VoiceTransition::classify(before, after) {
            VoiceTransition::Joined { to } => self.tracker.on_join(guild_id, member, to, now),
            VoiceTransition::Left { from } => {
                self.tracker.on_leave(guild_id, member, Some(from), now)
            }
            VoiceTransition::Moved { from, to } => {
                self.tracker.on_move(guild_id, member, Some(from), to, now)
            }
            VoiceTransition::StateChanged { channel } => {
                self.tracker
                    .on_channel_membership_changed(guild_id, channel, now)
            }
            VoiceTransition::Disconnected => self.tracker.on_leave(guild_id, member, None, now),
        };
        self.award_flushes(guild_id, flushes, now).await
    }

    /// Reconciles every guild the bot is in against its voice channels.
    ///
    /// A guild whose listing fails is skipped and counted as a failure.
    pub async fn periodic_scan(&self, now: DateTime<Utc>) -> Result<EventOutcome, EngineError> {
        let mut outcome = EventOutcome::default();
        for guild_id in self.directory.guilds().await? {
            if self.has_departed(guild_id) {
                continue;
            }
            let channels = match self.directory.voice_channels(guild_id).await {
                Ok(channels) => channels,
                Err(err) => {
                    warn!(guild = %guild_id, error = %err, "voice scan skipped");
                    outcome.failures += 1;
                    continue;
                }
            };
            let flushes = self.tracker.periodic_scan(guild_id, &channels, now);
            debug!(
                guild = %guild_id,
                tracked = self.tracker.tracked_count(guild_id),
                "voice scan complete"
            );
            match self.award_flushes(guild_id, flushes, now).await {
                Ok(scanned) => outcome.merge(scanned),
                Err(err) => {
                    warn!(guild = %guild_id, error = %err, "voice scan awards abandoned");
                    outcome.failures += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Awards every closed session. One member's store failure is logged
    /// and does not stop the others.
    async fn award_flushes(
        &self,
        guild_id: GuildId,
        flushes: Vec<VoiceFlush>,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, EngineError> {
        let mut outcome = EventOutcome::default();
        if flushes.is_empty() {
            return Ok(outcome);
        }
        let config = self.ledger.config(guild_id)?;
        let mut rewards: Option<Vec<LevelReward>> = None;

        for flush in flushes {
            let award = match self.ledger.award_voice_xp(&config, &flush, now) {
                Ok(Some(award)) => award,
                Ok(None) => continue,
                Err(err) => {
                    warn!(guild = %guild_id, user = %flush.user_id, error = %err, "voice award failed");
                    outcome.failures += 1;
                    continue;
                }
            };
            if award.change.is_level_up() {
                if rewards.is_none() {
                    match self.ledger.rewards(guild_id) {
                        Ok(loaded) => rewards = Some(loaded),
                        Err(err) => {
                            warn!(guild = %guild_id, error = %err, "reward rules unavailable");
                            outcome.failures += 1;
                        }
                    }
                }
                let held = self.roles.held(guild_id, flush.user_id, &flush.roles);
                let report = self
                    .dispatcher
                    .dispatch(
                        &config,
                        rewards.as_deref().unwrap_or_default(),
                        &award,
                        &held,
                        self.announce(&config),
                    )
                    .await;
                self.roles.record(guild_id, flush.user_id, &report);
                outcome.dispatch.merge(report);
            }
            outcome.awards.push(award);
        }
        Ok(outcome)
    }

    fn announce(&self, config: &GuildLevelConfig) -> Announce {
        Announce {
            configured: config.level_up_channel,
            fallback: self.activity.last(config.guild_id),
        }
    }

    fn has_departed(&self, guild_id: GuildId) -> bool {
        lock(&self.departed).contains(&guild_id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
