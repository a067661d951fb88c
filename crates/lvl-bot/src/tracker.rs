//! Owner of voice presence state for all guilds.
//!
//! Each guild has its own [`GuildVoice`] behind its own mutex, so callbacks
//! for members of one guild are applied one at a time while different
//! guilds never contend. Locks are never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use lvl_core::{GuildId, GuildVoice, UserId, VoiceChannelState, VoiceFlush, VoiceMember};
use tracing::debug;

#[derive(Debug, Default)]
pub struct VoiceTracker {
    guilds: Mutex<HashMap<GuildId, Arc<Mutex<GuildVoice>>>>,
}

impl VoiceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_join(
        &self,
        guild_id: GuildId,
        member: &VoiceMember,
        channel: &VoiceChannelState,
        now: DateTime<Utc>,
    ) -> Vec<VoiceFlush> {
        self.with_guild(guild_id, |voice| voice.join(member, channel, now))
    }

    pub fn on_leave(
        &self,
        guild_id: GuildId,
        member: &VoiceMember,
        channel: Option<&VoiceChannelState>,
        now: DateTime<Utc>,
    ) -> Vec<VoiceFlush> {
        self.with_guild(guild_id, |voice| voice.leave(member, channel, now))
    }

    pub fn on_move(
        &self,
        guild_id: GuildId,
        member: &VoiceMember,
        from: Option<&VoiceChannelState>,
        to: &VoiceChannelState,
        now: DateTime<Utc>,
    ) -> Vec<VoiceFlush> {
        self.with_guild(guild_id, |voice| voice.move_member(member, from, to, now))
    }

    pub fn on_channel_membership_changed(
        &self,
        guild_id: GuildId,
        channel: &VoiceChannelState,
        now: DateTime<Utc>,
    ) -> Vec<VoiceFlush> {
        self.with_guild(guild_id, |voice| voice.sync_channel(channel, now))
    }

    pub fn periodic_scan(
        &self,
        guild_id: GuildId,
        channels: &[VoiceChannelState],
        now: DateTime<Utc>,
    ) -> Vec<VoiceFlush> {
        self.with_guild(guild_id, |voice| voice.scan(channels, now))
    }

    /// Closes one member's session; `None` when there was none or it was
    /// shorter than a minute.
    pub fn close_session(&self, guild_id: GuildId, user_id: UserId, now: DateTime<Utc>) -> Option<i64> {
        self.with_guild(guild_id, |voice| voice.close_session(user_id, now))
    }

    /// Drops all state of a guild without awarding open sessions.
    pub fn forget_guild(&self, guild_id: GuildId) -> bool {
        let removed = lock(&self.guilds).remove(&guild_id).is_some();
        if removed {
            debug!(guild = %guild_id, "voice state dropped");
        }
        removed
    }

    pub fn is_tracking(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.existing(guild_id)
            .is_some_and(|voice| lock(&voice).is_tracking(user_id))
    }

    pub fn tracked_count(&self, guild_id: GuildId) -> usize {
        self.existing(guild_id)
            .map_or(0, |voice| lock(&voice).tracked_count())
    }

    fn existing(&self, guild_id: GuildId) -> Option<Arc<Mutex<GuildVoice>>> {
        lock(&self.guilds).get(&guild_id).cloned()
    }

    fn with_guild<T>(&self, guild_id: GuildId, apply: impl FnOnce(&mut GuildVoice) -> T) -> T {
        let voice = Arc::clone(lock(&self.guilds).entry(guild_id).or_default());
        let mut voice = lock(&voice);
        apply(&mut voice)
    }
}

/// State stays usable after a panic in another holder; every mutation
/// leaves `GuildVoice` consistent before it can panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use lvl_core::ChannelId;

    use super::*;

    fn guild(id: u64) -> GuildId {
        GuildId::new(id).unwrap()
    }

    fn member(id: u64) -> VoiceMember {
        VoiceMember {
            user_id: UserId::new(id).unwrap(),
            is_bot: false,
            roles: Vec::new(),
        }
    }

    fn channel(id: u64, occupants: &[VoiceMember]) -> VoiceChannelState {
        VoiceChannelState {
            channel_id: ChannelId::new(id).unwrap(),
            occupants: occupants.to_vec(),
        }
    }

    #[test]
    fn guilds_are_isolated() {
        let tracker = VoiceTracker::new();
        let now = Utc::now();
        tracker.on_join(guild(1), &member(1), &channel(10, &[member(1), member(2)]), now);
        tracker.on_join(guild(2), &member(1), &channel(10, &[member(1)]), now);

        assert!(tracker.is_tracking(guild(1), member(1).user_id));
        assert!(!tracker.is_tracking(guild(2), member(1).user_id));
        assert_eq!(tracker.tracked_count(guild(1)), 2);
    }

    #[test]
    fn forgetting_a_guild_discards_sessions() {
        let tracker = VoiceTracker::new();
        let now = Utc::now();
        tracker.periodic_scan(guild(1), &[channel(10, &[member(1), member(2)])], now);
        assert!(tracker.forget_guild(guild(1)));
        assert!(!tracker.forget_guild(guild(1)));
        assert_eq!(tracker.tracked_count(guild(1)), 0);
        assert_eq!(
            tracker.close_session(guild(1), member(1).user_id, now + Duration::minutes(5)),
            None
        );
    }

    #[test]
    fn close_session_reports_whole_minutes() {
        let tracker = VoiceTracker::new();
        let now = Utc::now();
        tracker.periodic_scan(guild(1), &[channel(10, &[member(1), member(2)])], now);
        assert_eq!(
            tracker.close_session(guild(1), member(1).user_id, now + Duration::seconds(150)),
            Some(2)
        );
        assert!(!tracker.is_tracking(guild(1), member(1).user_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callbacks_do_not_double_count() {
        let tracker = Arc::new(VoiceTracker::new());
        let start = Utc::now();
        tracker.periodic_scan(guild(1), &[channel(10, &[member(1), member(2)])], start);

        let end = start + Duration::minutes(3);
        let mut handles = Vec::new();
        for user in [1, 2] {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                let remaining: Vec<_> = [1, 2]
                    .into_iter()
                    .filter(|other| *other != user)
                    .map(member)
                    .collect();
                tracker.on_leave(guild(1), &member(user), Some(&channel(10, &remaining)), end)
            }));
        }

        let mut flushed = Vec::new();
        for handle in handles {
            flushed.extend(handle.await.unwrap());
        }
        flushed.sort_by_key(|flush| flush.user_id);
        let users: Vec<_> = flushed.iter().map(|flush| flush.user_id.get()).collect();
        assert_eq!(users, vec![1, 2]);
        assert!(flushed.iter().all(|flush| flush.minutes == 3));
    }
}
