//! Side effects of a level-up: announcement, role edits, reward DMs.
//!
//! Everything here is best-effort. A failed platform call is logged and
//! counted, and the remaining actions still run.

use std::sync::Arc;

use lvl_core::{
    ChannelId, GuildId, GuildLevelConfig, LevelChange, LevelReward, RewardAction, RoleId, UserId,
    plan_rewards,
};
use lvl_db::XpAward;
use tracing::{info, warn};

use crate::platform::{Notifier, PlatformError};

/// Where a level-up announcement may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Announce {
    /// The guild's configured level-up channel.
    pub configured: Option<ChannelId>,
    /// The most recently active text channel of the guild.
    pub fallback: Option<ChannelId>,
}

impl Announce {
    pub const fn channel(&self) -> Option<ChannelId> {
        match self.configured {
            Some(channel) => Some(channel),
            None => self.fallback,
        }
    }
}

/// What a dispatch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub granted: Vec<RoleId>,
    pub revoked: Vec<RoleId>,
    pub announced: bool,
    pub direct_messages: usize,
    pub failures: usize,
}

impl DispatchReport {
    pub fn merge(&mut self, other: Self) {
        self.granted.extend(other.granted);
        self.revoked.extend(other.revoked);
        self.announced |= other.announced;
        self.direct_messages += other.direct_messages;
        self.failures += other.failures;
    }
}

/// Level-up announcement text.
pub fn level_up_message(user_id: UserId, change: LevelChange) -> String {
    format!(
        "<@{user_id}> reached **{} Level {}**!",
        change.axis.title(),
        change.new
    )
}

/// Direct message sent with a reward role.
pub fn reward_message(reward: &LevelReward, change: LevelChange) -> String {
    format!(
        "You've been awarded the <@&{}> role in guild {} for reaching {} level {}!",
        reward.role_id, reward.guild_id, change.axis, change.new
    )
}

pub struct RewardDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl RewardDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Runs the side effects of `award`. Does nothing unless it levelled up.
    ///
    /// `held` are the member's roles as last seen on the platform.
    pub async fn dispatch(
        &self,
        config: &GuildLevelConfig,
        rewards: &[LevelReward],
        award: &XpAward,
        held: &[RoleId],
        announce: Announce,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let change = award.change;
        if !change.is_level_up() {
            return report;
        }
        let guild_id = config.guild_id;
        let user_id = award.progress.user_id;
        info!(guild = %guild_id, user = %user_id, axis = %change.axis, level = change.new, "level up");

        if config.level_up_messages {
            if let Some(channel_id) = announce.channel() {
                let content = level_up_message(user_id, change);
                match self.notifier.send_channel_message(channel_id, &content).await {
                    Ok(()) => report.announced = true,
                    Err(err) => failed(&mut report, &err, "level-up announcement"),
                }
            }
        }

        let plan = plan_rewards(rewards, award.progress.levels(), change, held);
        for action in plan {
            let result = match &action {
                RewardAction::Grant { reward } => {
                    self.notifier
                        .grant_role(guild_id, user_id, reward.role_id)
                        .await
                }
                RewardAction::Swap { reward, revoke } => {
                    self.notifier
                        .swap_roles(guild_id, user_id, reward.role_id, revoke)
                        .await
                }
                RewardAction::Revoke { revoke, .. } => {
                    self.revoke_each(guild_id, user_id, revoke, &mut report).await;
                    continue;
                }
            };
            if let Err(err) = result {
                failed(&mut report, &err, "reward role grant");
                continue;
            }

            let reward = action.reward();
            info!(guild = %guild_id, user = %user_id, role = %reward.role_id, "reward role granted");
            report.granted.push(reward.role_id);
            if let RewardAction::Swap { revoke, .. } = &action {
                report.revoked.extend(revoke.iter().copied());
            }
            if reward.notify_by_dm {
                let content = reward_message(reward, change);
                match self.notifier.send_direct_message(user_id, &content).await {
                    Ok(()) => report.direct_messages += 1,
                    Err(err) => failed(&mut report, &err, "reward direct message"),
                }
            }
        }
        report
    }

    async fn revoke_each(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        roles: &[RoleId],
        report: &mut DispatchReport,
    ) {
        for role_id in roles {
            match self.notifier.remove_role(guild_id, user_id, *role_id).await {
                Ok(()) => report.revoked.push(*role_id),
                Err(err) => failed(report, &err, "stale reward role removal"),
            }
        }
    }
}

fn failed(report: &mut DispatchReport, err: &PlatformError, action: &str) {
    warn!(error = %err, action, "platform call failed");
    report.failures += 1;
}
