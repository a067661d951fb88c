//! Integration tests for the event engine with in-memory collaborators.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use lvl_bot::{Engine, Notifier, PlatformError, VoiceDirectory};
use lvl_core::{
    ChannelId, GuildId, Inbound, RoleId, Setting, UserId, VoiceChannelState, VoiceMember, XpAxis,
};
use lvl_db::{Database, NewReward};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Grant(UserId, RoleId),
    Remove(UserId, RoleId),
    Swap(UserId, RoleId, Vec<RoleId>),
    Dm(UserId, String),
    Channel(ChannelId, String),
}

#[derive(Default)]
struct FakeNotifier {
    calls: Mutex<Vec<Call>>,
    deny_roles: bool,
}

impl FakeNotifier {
    fn denying_roles() -> Self {
        Self {
            deny_roles: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn role_edit(&self, call: Call) -> Result<(), PlatformError> {
        if self.deny_roles {
            return Err(PlatformError::Permission("manage roles".to_string()));
        }
        self.record(call);
        Ok(())
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn grant_role(&self, _: GuildId, user: UserId, role: RoleId) -> Result<(), PlatformError> {
        self.role_edit(Call::Grant(user, role))
    }

    async fn remove_role(&self, _: GuildId, user: UserId, role: RoleId) -> Result<(), PlatformError> {
        self.role_edit(Call::Remove(user, role))
    }

    async fn swap_roles(
        &self,
        _: GuildId,
        user: UserId,
        grant: RoleId,
        revoke: &[RoleId],
    ) -> Result<(), PlatformError> {
        self.role_edit(Call::Swap(user, grant, revoke.to_vec()))
    }

    async fn send_direct_message(&self, user: UserId, content: &str) -> Result<(), PlatformError> {
        self.record(Call::Dm(user, content.to_string()));
        Ok(())
    }

    async fn send_channel_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.record(Call::Channel(channel, content.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct FakeDirectory {
    channels: Mutex<BTreeMap<GuildId, Vec<VoiceChannelState>>>,
}

impl FakeDirectory {
    fn set(&self, guild: GuildId, channels: Vec<VoiceChannelState>) {
        self.channels.lock().unwrap().insert(guild, channels);
    }
}

#[async_trait]
impl VoiceDirectory for FakeDirectory {
    async fn guilds(&self) -> Result<Vec<GuildId>, PlatformError> {
        Ok(self.channels.lock().unwrap().keys().copied().collect())
    }

    async fn voice_channels(&self, guild: GuildId) -> Result<Vec<VoiceChannelState>, PlatformError> {
        Ok(self
            .channels
            .lock()
            .unwrap()
            .get(&guild)
            .cloned()
            .unwrap_or_default())
    }
}

fn guild() -> GuildId {
    GuildId::new(1).unwrap()
}

fn user(id: u64) -> UserId {
    UserId::new(id).unwrap()
}

fn role(id: u64) -> RoleId {
    RoleId::new(id).unwrap()
}

fn channel(id: u64) -> ChannelId {
    ChannelId::new(id).unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

fn member(id: u64) -> VoiceMember {
    VoiceMember {
        user_id: user(id),
        is_bot: false,
        roles: Vec::new(),
    }
}

fn voice(channel_id: u64, members: &[u64]) -> VoiceChannelState {
    VoiceChannelState {
        channel_id: channel(channel_id),
        occupants: members.iter().map(|id| member(*id)).collect(),
    }
}

/// A database where every message is worth exactly 100 text XP.
fn fixed_xp_database() -> Database {
    let mut db = Database::open_in_memory().unwrap();
    let mut config = db.guild_config(guild()).unwrap();
    config.apply(Setting::TextXpMax, "100").unwrap();
    config.apply(Setting::TextXpMin, "100").unwrap();
    db.save_guild_config(&config).unwrap();
    db
}

fn reward(role_id: u64, text: u32, voice: u32, notify_by_dm: bool) -> NewReward {
    NewReward {
        guild_id: guild(),
        role_id: role(role_id),
        required_text_level: text,
        required_voice_level: voice,
        remove_previous: false,
        notify_by_dm,
    }
}

fn engine(db: Database, notifier: &Arc<FakeNotifier>, directory: &Arc<FakeDirectory>) -> Engine {
    let notifier: Arc<dyn Notifier> = notifier.clone();
    let directory: Arc<dyn VoiceDirectory> = directory.clone();
    Engine::new(db, notifier, directory)
}

fn message(user_id: u64, channel_id: u64) -> Inbound {
    Inbound::MessageSent {
        guild_id: guild(),
        user_id: user(user_id),
        channel_id: channel(channel_id),
        is_bot: false,
        roles: Vec::new(),
    }
}

fn voice_change(
    user_id: u64,
    before: Option<VoiceChannelState>,
    after: Option<VoiceChannelState>,
) -> Inbound {
    Inbound::VoiceStateChanged {
        guild_id: guild(),
        member: member(user_id),
        before,
        after,
    }
}

#[tokio::test]
async fn level_up_announces_and_grants_reward() {
    let mut db = fixed_xp_database();
    db.add_reward(&reward(50, 1, 0, true)).unwrap();
    let notifier = Arc::new(FakeNotifier::default());
    let engine = engine(db, &notifier, &Arc::new(FakeDirectory::default()));

    let outcome = engine.handle_at(message(2, 5), t0()).await.unwrap();

    assert_eq!(outcome.awards.len(), 1);
    assert_eq!(outcome.awards[0].progress.text_level, 1);
    assert_eq!(outcome.dispatch.granted, vec![role(50)]);
    assert_eq!(
        notifier.calls(),
        vec![
            Call::Channel(channel(5), "<@2> reached **Text Level 1**!".to_string()),
            Call::Grant(user(2), role(50)),
            Call::Dm(
                user(2),
                "You've been awarded the <@&50> role in guild 1 for reaching text level 1!"
                    .to_string()
            ),
        ]
    );

    // Cooldown: a second message ten seconds later earns nothing.
    let outcome = engine
        .handle_at(message(2, 5), t0() + Duration::seconds(10))
        .await
        .unwrap();
    assert!(outcome.awards.is_empty());
    assert_eq!(notifier.calls().len(), 3);
}

#[tokio::test]
async fn bot_messages_earn_nothing() {
    let notifier = Arc::new(FakeNotifier::default());
    let engine = engine(fixed_xp_database(), &notifier, &Arc::new(FakeDirectory::default()));

    let outcome = engine
        .handle_at(
            Inbound::MessageSent {
                guild_id: guild(),
                user_id: user(2),
                channel_id: channel(5),
                is_bot: true,
                roles: Vec::new(),
            },
            t0(),
        )
        .await
        .unwrap();
    assert!(outcome.awards.is_empty());
    assert!(notifier.calls().is_empty());
}

#[tokio::test]
async fn configured_channel_takes_announcements() {
    let mut db = fixed_xp_database();
    let mut config = db.guild_config(guild()).unwrap();
    config.apply(Setting::LevelUpChannel, "99").unwrap();
    db.save_guild_config(&config).unwrap();
    let notifier = Arc::new(FakeNotifier::default());
    let engine = engine(db, &notifier, &Arc::new(FakeDirectory::default()));

    engine.handle_at(message(2, 5), t0()).await.unwrap();

    assert_eq!(
        notifier.calls(),
        vec![Call::Channel(channel(99), "<@2> reached **Text Level 1**!".to_string())]
    );
    assert_eq!(engine.activity().last(guild()), Some(channel(5)));
}

#[tokio::test]
async fn permission_failure_keeps_the_award() {
    let mut db = fixed_xp_database();
    db.add_reward(&reward(50, 1, 0, true)).unwrap();
    let notifier = Arc::new(FakeNotifier::denying_roles());
    let engine = engine(db, &notifier, &Arc::new(FakeDirectory::default()));

    let outcome = engine.handle_at(message(2, 5), t0()).await.unwrap();

    assert_eq!(outcome.awards[0].progress.text_xp, 100);
    assert_eq!(outcome.dispatch.failures, 1);
    assert!(outcome.dispatch.granted.is_empty());
    assert!(outcome.dispatch.announced);
    // No reward DM for a role that was never granted.
    assert_eq!(notifier.calls().len(), 1);
}

#[tokio::test]
async fn two_member_session_awards_whole_minutes() {
    let notifier = Arc::new(FakeNotifier::default());
    let engine = engine(
        Database::open_in_memory().unwrap(),
        &notifier,
        &Arc::new(FakeDirectory::default()),
    );

    engine
        .handle_at(voice_change(1, None, Some(voice(10, &[1]))), t0())
        .await
        .unwrap();
    assert!(!engine.tracker().is_tracking(guild(), user(1)));

    engine
        .handle_at(voice_change(2, None, Some(voice(10, &[1, 2]))), t0())
        .await
        .unwrap();
    assert_eq!(engine.tracker().tracked_count(guild()), 2);

    let left_at = t0() + Duration::seconds(5 * 60 + 30);
    let outcome = engine
        .handle_at(voice_change(1, Some(voice(10, &[2])), None), left_at)
        .await
        .unwrap();

    assert_eq!(outcome.awards.len(), 2);
    for award in &outcome.awards {
        assert_eq!(award.change.axis, XpAxis::Voice);
        assert_eq!(award.xp, 25);
        assert_eq!(award.progress.total_voice_minutes, 5);
    }
    assert_eq!(engine.tracker().tracked_count(guild()), 0);
}

#[tokio::test]
async fn reward_needing_both_axes_waits_for_both() {
    let mut db = fixed_xp_database();
    db.add_reward(&reward(70, 1, 1, false)).unwrap();
    let notifier = Arc::new(FakeNotifier::default());
    let engine = engine(db, &notifier, &Arc::new(FakeDirectory::default()));

    let outcome = engine.handle_at(message(1, 5), t0()).await.unwrap();
    assert!(outcome.dispatch.granted.is_empty());

    engine
        .handle_at(voice_change(1, None, Some(voice(10, &[1, 2]))), t0())
        .await
        .unwrap();
    let outcome = engine
        .handle_at(
            voice_change(2, Some(voice(10, &[1])), None),
            t0() + Duration::minutes(20),
        )
        .await
        .unwrap();

    // 20 minutes at 5 XP each is exactly voice level 1 for both members;
    // only member 1 also has text level 1.
    assert_eq!(outcome.awards.len(), 2);
    assert_eq!(outcome.dispatch.granted, vec![role(70)]);
    assert!(notifier.calls().contains(&Call::Grant(user(1), role(70))));
    assert!(!notifier.calls().contains(&Call::Grant(user(2), role(70))));
}

#[tokio::test]
async fn role_granted_mid_session_is_not_granted_again_on_voice_flush() {
    let mut db = fixed_xp_database();
    db.add_reward(&reward(70, 1, 1, true)).unwrap();
    db.set_xp(guild(), user(1), XpAxis::Voice, 100).unwrap();
    let notifier = Arc::new(FakeNotifier::default());
    let engine = engine(db, &notifier, &Arc::new(FakeDirectory::default()));

    engine
        .handle_at(voice_change(1, None, Some(voice(10, &[1, 2]))), t0())
        .await
        .unwrap();
    let outcome = engine
        .handle_at(message(1, 5), t0() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(outcome.dispatch.granted, vec![role(70)]);

    // The voice occupant snapshot still lists no roles for member 1.
    let outcome = engine
        .handle_at(
            voice_change(2, Some(voice(10, &[1])), None),
            t0() + Duration::minutes(60),
        )
        .await
        .unwrap();
    let member_one = outcome
        .awards
        .iter()
        .find(|award| award.progress.user_id == user(1))
        .unwrap();
    assert_eq!((member_one.change.old, member_one.change.new), (1, 2));
    assert!(outcome.dispatch.granted.is_empty());

    let calls = notifier.calls();
    let grants = calls
        .iter()
        .filter(|call| **call == Call::Grant(user(1), role(70)))
        .count();
    let dms = calls
        .iter()
        .filter(|call| matches!(call, Call::Dm(..)))
        .count();
    assert_eq!((grants, dms), (1, 1));
}

#[tokio::test]
async fn guild_available_starts_tracking_and_scan_closes_sessions() {
    let directory = Arc::new(FakeDirectory::default());
    let notifier = Arc::new(FakeNotifier::default());
    let engine = engine(Database::open_in_memory().unwrap(), &notifier, &directory);

    let outcome = engine
        .handle_at(
            Inbound::GuildAvailable {
                guild_id: guild(),
                voice_channels: vec![voice(10, &[1, 2]), voice(11, &[3])],
            },
            t0(),
        )
        .await
        .unwrap();
    assert!(outcome.awards.is_empty());
    assert!(engine.tracker().is_tracking(guild(), user(1)));
    assert!(!engine.tracker().is_tracking(guild(), user(3)));

    directory.set(guild(), vec![voice(10, &[1, 2])]);
    let outcome = engine
        .handle_at(Inbound::Scan, t0() + Duration::minutes(10))
        .await
        .unwrap();
    assert!(outcome.awards.is_empty());

    directory.set(guild(), Vec::new());
    let outcome = engine
        .handle_at(Inbound::Scan, t0() + Duration::minutes(12))
        .await
        .unwrap();
    assert_eq!(outcome.awards.len(), 2);
    assert!(outcome.awards.iter().all(|award| award.xp == 60));
}

#[tokio::test]
async fn departed_guild_is_ignored_until_available_again() {
    let directory = Arc::new(FakeDirectory::default());
    let notifier = Arc::new(FakeNotifier::default());
    let engine = engine(fixed_xp_database(), &notifier, &directory);

    engine
        .handle_at(voice_change(1, None, Some(voice(10, &[1, 2]))), t0())
        .await
        .unwrap();
    engine
        .handle_at(Inbound::GuildRemoved { guild_id: guild() }, t0())
        .await
        .unwrap();
    assert_eq!(engine.tracker().tracked_count(guild()), 0);

    let outcome = engine
        .handle_at(message(1, 5), t0() + Duration::minutes(1))
        .await
        .unwrap();
    assert!(outcome.awards.is_empty());

    directory.set(guild(), vec![voice(10, &[1, 2])]);
    let outcome = engine
        .handle_at(Inbound::Scan, t0() + Duration::minutes(2))
        .await
        .unwrap();
    assert!(outcome.awards.is_empty());
    assert_eq!(engine.tracker().tracked_count(guild()), 0);

    engine
        .handle_at(
            Inbound::GuildAvailable {
                guild_id: guild(),
                voice_channels: Vec::new(),
            },
            t0() + Duration::minutes(3),
        )
        .await
        .unwrap();
    let outcome = engine
        .handle_at(message(1, 5), t0() + Duration::minutes(4))
        .await
        .unwrap();
    assert_eq!(outcome.awards.len(), 1);
}
