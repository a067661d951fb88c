//! Voice presence state machine for a single guild.
//!
//! [`GuildVoice`] keeps the human occupants of every voice channel it has
//! heard about and the open [`VoiceSession`] of every member that is
//! actively present. A session exists iff its member sits in a channel with
//! at least [`MIN_TRACKED_OCCUPANTS`] humans (the anti-idle rule). Every
//! mutation re-evaluates all occupants of each touched channel, so a member
//! left alone is flushed immediately and a solitary member starts earning
//! the moment a second human arrives.
//!
//! The state machine is synchronous and time is always passed in; callers
//! are responsible for serializing access per guild.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ChannelId, RoleId, UserId};

/// Minimum number of humans in a channel before anyone in it is tracked.
pub const MIN_TRACKED_OCCUPANTS: usize = 2;

/// A member as seen in a voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceMember {
    pub user_id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

/// Occupancy of one voice channel after a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceChannelState {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub occupants: Vec<VoiceMember>,
}

impl VoiceChannelState {
    /// Non-bot occupants.
    pub fn humans(&self) -> impl Iterator<Item = &VoiceMember> {
        self.occupants.iter().filter(|member| !member.is_bot)
    }

    fn with_member(&self, member: &VoiceMember) -> Self {
        let mut state = self.without(member.user_id);
        state.occupants.push(member.clone());
        state
    }

    fn without(&self, user_id: UserId) -> Self {
        Self {
            channel_id: self.channel_id,
            occupants: self
                .occupants
                .iter()
                .filter(|member| member.user_id != user_id)
                .cloned()
                .collect(),
        }
    }
}

/// An open interval of active voice presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceSession {
    pub channel_id: ChannelId,
    pub joined_at: DateTime<Utc>,
}

impl VoiceSession {
    /// Whole minutes elapsed at `now`, floored.
    #[must_use]
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.joined_at).num_seconds().max(0) / 60
    }
}

/// A closed session worth at least one minute of voice XP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFlush {
    pub user_id: UserId,
    /// Channel the session was open in; exemption rules apply to it.
    pub channel_id: ChannelId,
    pub roles: Vec<RoleId>,
    pub minutes: i64,
}

/// Voice presence of one guild.
#[derive(Debug, Default)]
pub struct GuildVoice {
    occupants: BTreeMap<ChannelId, BTreeMap<UserId, VoiceMember>>,
    sessions: BTreeMap<UserId, VoiceSession>,
}

impl GuildVoice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn session(&self, user_id: UserId) -> Option<&VoiceSession> {
        self.sessions.get(&user_id)
    }

    #[must_use]
    pub fn is_tracking(&self, user_id: UserId) -> bool {
        self.sessions.contains_key(&user_id)
    }

    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.sessions.len()
    }

    /// Closes the member's session, if any.
    ///
    /// The session is removed regardless of its length. Returns the elapsed
    /// whole minutes, or `None` when no session was open or it lasted less
    /// than a minute.
    pub fn close_session(&mut self, user_id: UserId, now: DateTime<Utc>) -> Option<i64> {
        let session = self.sessions.remove(&user_id)?;
        let minutes = session.elapsed_minutes(now);
        debug!(user = %user_id, channel = %session.channel_id, minutes, "voice session closed");
        (minutes >= 1).then_some(minutes)
    }

    /// Member connected to `channel`, whose occupancy is given after the join.
    pub fn join(
        &mut self,
        member: &VoiceMember,
        channel: &VoiceChannelState,
        now: DateTime<Utc>,
    ) -> Vec<VoiceFlush> {
        self.sync_channel(&channel.with_member(member), now)
    }

    /// Member disconnected. `channel` is the occupancy of the channel they
    /// left, after they left, when the platform reports it.
    pub fn leave(
        &mut self,
        member: &VoiceMember,
        channel: Option<&VoiceChannelState>,
        now: DateTime<Utc>,
    ) -> Vec<VoiceFlush> {
        let mut flushes = Vec::new();
        self.refresh(member);
        self.flush(member.user_id, now, &mut flushes);

        let vacated: Vec<ChannelId> = self
            .occupants
            .iter_mut()
            .filter_map(|(channel_id, members)| {
                members.remove(&member.user_id).map(|_| *channel_id)
            })
            .collect();

        if let Some(state) = channel {
            flushes.extend(self.sync_channel(&state.without(member.user_id), now));
        }
        for channel_id in vacated {
            if channel.is_some_and(|state| state.channel_id == channel_id) {
                continue;
            }
            self.evaluate(channel_id, now, &mut flushes);
        }
        self.prune();
        flushes
    }

    /// Member moved between channels. The session in `from` closes (and is
    /// credited to `from`) before tracking is evaluated in `to`.
    pub fn move_member(
        &mut self,
        member: &VoiceMember,
        from: Option<&VoiceChannelState>,
        to: &VoiceChannelState,
        now: DateTime<Utc>,
    ) -> Vec<VoiceFlush> {
        let mut flushes = self.leave(member, from, now);
        flushes.extend(self.join(member, to, now));
        flushes
    }

    /// Replaces the known occupancy of one channel and re-evaluates it.
    pub fn sync_channel(
        &mut self,
        channel: &VoiceChannelState,
        now: DateTime<Utc>,
    ) -> Vec<VoiceFlush> {
        let mut flushes = Vec::new();
        let channel_id = channel.channel_id;
        let humans: BTreeMap<UserId, VoiceMember> = channel
            .humans()
            .map(|member| (member.user_id, member.clone()))
            .collect();

        // Members we thought were here but are gone.
        let departed: Vec<UserId> = self
            .occupants
            .get(&channel_id)
            .map(|known| {
                known
                    .keys()
                    .filter(|user_id| !humans.contains_key(user_id))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        for user_id in departed {
            if self.session_channel(user_id) == Some(channel_id) {
                self.flush(user_id, now, &mut flushes);
            }
        }

        // Members that show up here while we still had them elsewhere moved
        // without us hearing about it.
        let mut touched = BTreeSet::new();
        for user_id in humans.keys() {
            for (other_id, members) in &self.occupants {
                if *other_id != channel_id && members.contains_key(user_id) {
                    touched.insert(*other_id);
                }
            }
            if self
                .session_channel(*user_id)
                .is_some_and(|session_channel| session_channel != channel_id)
            {
                self.flush(*user_id, now, &mut flushes);
            }
        }
        for other_id in &touched {
            if let Some(members) = self.occupants.get_mut(other_id) {
                members.retain(|user_id, _| !humans.contains_key(user_id));
            }
        }

        self.occupants.insert(channel_id, humans);
        self.evaluate(channel_id, now, &mut flushes);
        for other_id in touched {
            self.evaluate(other_id, now, &mut flushes);
        }
        self.prune();
        flushes
    }

    /// Reconciles against a full listing of the guild's voice channels.
    ///
    /// Untracked occupants of channels with enough humans start a session
    /// now; time before the scan is never credited. Channels missing from
    /// the listing are treated as empty.
    pub fn scan(&mut self, channels: &[VoiceChannelState], now: DateTime<Utc>) -> Vec<VoiceFlush> {
        let mut flushes = Vec::new();
        let listed: BTreeSet<ChannelId> = channels.iter().map(|state| state.channel_id).collect();
        let stale: Vec<ChannelId> = self
            .occupants
            .keys()
            .filter(|channel_id| !listed.contains(channel_id))
            .copied()
            .collect();
        for channel_id in stale {
            flushes.extend(self.sync_channel(
                &VoiceChannelState {
                    channel_id,
                    occupants: Vec::new(),
                },
                now,
            ));
        }
        for state in channels {
            flushes.extend(self.sync_channel(state, now));
        }
        flushes
    }

    fn evaluate(&mut self, channel_id: ChannelId, now: DateTime<Utc>, flushes: &mut Vec<VoiceFlush>) {
        let users: Vec<UserId> = self
            .occupants
            .get(&channel_id)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default();

        if users.len() >= MIN_TRACKED_OCCUPANTS {
            for user_id in users {
                if self.sessions.contains_key(&user_id) {
                    continue;
                }
                debug!(user = %user_id, channel = %channel_id, "voice tracking started");
                self.sessions.insert(
                    user_id,
                    VoiceSession {
                        channel_id,
                        joined_at: now,
                    },
                );
            }
        } else {
            for user_id in users {
                if self.session_channel(user_id) == Some(channel_id) {
                    debug!(user = %user_id, channel = %channel_id, "alone in voice, tracking stopped");
                    self.flush(user_id, now, flushes);
                }
            }
        }
    }

    fn flush(&mut self, user_id: UserId, now: DateTime<Utc>, flushes: &mut Vec<VoiceFlush>) {
        let Some(channel_id) = self.session_channel(user_id) else {
            return;
        };
        let roles = self
            .occupants
            .get(&channel_id)
            .and_then(|members| members.get(&user_id))
            .map(|member| member.roles.clone())
            .unwrap_or_default();
        if let Some(minutes) = self.close_session(user_id, now) {
            flushes.push(VoiceFlush {
                user_id,
                channel_id,
                roles,
                minutes,
            });
        }
    }

    fn session_channel(&self, user_id: UserId) -> Option<ChannelId> {
        self.sessions.get(&user_id).map(|session| session.channel_id)
    }

    fn refresh(&mut self, member: &VoiceMember) {
        for members in self.occupants.values_mut() {
            if let Some(known) = members.get_mut(&member.user_id) {
                known.roles.clone_from(&member.roles);
            }
        }
    }

    fn prune(&mut self) {
        self.occupants.retain(|_, members| !members.is_empty());
    }
}
