//! Reward evaluation.
//!
//! Turns a level-up into the list of role changes it earns. The plan is a
//! pure function of the guild's reward rows, the member's persisted levels
//! and the roles they already hold, so evaluating it twice never grants a
//! role twice.

use std::collections::{BTreeMap, BTreeSet};

use crate::progress::{LevelChange, Levels};
use crate::settings::LevelReward;
use crate::types::{RoleId, XpAxis};

/// A role change to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardAction {
    /// Grant the reward role.
    Grant { reward: LevelReward },
    /// Grant the reward role and revoke `revoke` in a single role edit.
    Swap {
        reward: LevelReward,
        revoke: Vec<RoleId>,
    },
    /// The reward role is already held; only stale lower roles go.
    Revoke {
        reward: LevelReward,
        revoke: Vec<RoleId>,
    },
}

impl RewardAction {
    #[must_use]
    pub const fn reward(&self) -> &LevelReward {
        match self {
            Self::Grant { reward } | Self::Swap { reward, .. } | Self::Revoke { reward, .. } => {
                reward
            }
        }
    }

    const fn grants(&self) -> bool {
        matches!(self, Self::Grant { .. } | Self::Swap { .. })
    }

    fn revoked(&self) -> &[RoleId] {
        match self {
            Self::Grant { .. } => &[],
            Self::Swap { revoke, .. } | Self::Revoke { revoke, .. } => revoke,
        }
    }
}

/// Returns whether `reward` fires for a member at `levels` after `change`.
///
/// Rewards needing both axes are checked against the current levels of
/// both. Single-axis rewards only fire when that axis is the one that
/// changed. A reward with no threshold never fires.
#[must_use]
pub fn reward_fires(reward: &LevelReward, levels: Levels, change: LevelChange) -> bool {
    let text = reward.required_text_level;
    let voice = reward.required_voice_level;
    match (text > 0, voice > 0) {
        (true, true) => levels.text >= text && levels.voice >= voice,
        (true, false) => change.axis == XpAxis::Text && change.new >= text,
        (false, true) => change.axis == XpAxis::Voice && change.new >= voice,
        (false, false) => false,
    }
}

/// Plans the role changes earned by `change`.
///
/// When several rows target the same role, the one with the highest
/// combined threshold wins (ties: higher text threshold, then lower row id).
/// Actions come out in ascending threshold order. A `remove_previous`
/// reward supersedes lower rewards granted in the same plan instead of
/// granting and immediately revoking them.
#[must_use]
pub fn plan_rewards(
    rewards: &[LevelReward],
    levels: Levels,
    change: LevelChange,
    held: &[RoleId],
) -> Vec<RewardAction> {
    let mut winners: BTreeMap<RoleId, &LevelReward> = BTreeMap::new();
    for reward in rewards.iter().filter(|reward| reward_fires(reward, levels, change)) {
        winners
            .entry(reward.role_id)
            .and_modify(|current| {
                if outranks(reward, current) {
                    *current = reward;
                }
            })
            .or_insert(reward);
    }
    let mut winners: Vec<&LevelReward> = winners.into_values().collect();
    winners.sort_by_key(|reward| (reward.threshold(), reward.id));

    let mut holding: BTreeSet<RoleId> = held.iter().copied().collect();
    let mut actions: Vec<RewardAction> = Vec::new();

    for reward in winners {
        let previous = if reward.remove_previous {
            previous_roles(rewards, reward)
        } else {
            BTreeSet::new()
        };

        // Lower grants planned earlier are dropped rather than revoked.
        let (superseded, kept): (Vec<_>, Vec<_>) = actions
            .into_iter()
            .partition(|action| action.grants() && previous.contains(&action.reward().role_id));
        actions = kept;
        for action in &superseded {
            holding.remove(&action.reward().role_id);
            holding.extend(action.revoked().iter().copied());
        }

        let revoke: Vec<RoleId> = previous.intersection(&holding).copied().collect();
        let action = if holding.contains(&reward.role_id) {
            if revoke.is_empty() {
                continue;
            }
            RewardAction::Revoke {
                reward: reward.clone(),
                revoke,
            }
        } else if revoke.is_empty() {
            RewardAction::Grant {
                reward: reward.clone(),
            }
        } else {
            RewardAction::Swap {
                reward: reward.clone(),
                revoke,
            }
        };

        holding.insert(reward.role_id);
        for role in action.revoked() {
            holding.remove(role);
        }
        actions.push(action);
    }

    actions
}

fn outranks(candidate: &LevelReward, current: &LevelReward) -> bool {
    let key = |reward: &LevelReward| {
        (
            reward.threshold(),
            reward.required_text_level,
            std::cmp::Reverse(reward.id),
        )
    };
    key(candidate) > key(current)
}

/// Roles of lower rewards on the same track: text-only, voice-only or
/// combined rewards only supersede rewards of the same kind.
fn previous_roles(rewards: &[LevelReward], reward: &LevelReward) -> BTreeSet<RoleId> {
    rewards
        .iter()
        .filter(|other| {
            other.role_id != reward.role_id
                && track(other) == track(reward)
                && other.threshold() < reward.threshold()
        })
        .map(|other| other.role_id)
        .collect()
}

const fn track(reward: &LevelReward) -> (bool, bool) {
    (reward.required_text_level > 0, reward.required_voice_level > 0)
}
