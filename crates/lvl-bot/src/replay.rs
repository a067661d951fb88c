//! JSON-lines platform driver.
//!
//! Inbound events are read as one JSON object per line; collaborator calls
//! are written as one JSON object per line. The voice directory is kept up
//! to date from the inbound events themselves, so a scan sees whatever the
//! event stream last reported.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lvl_core::{ChannelId, GuildId, Inbound, RoleId, UserId, VoiceChannelState};
use serde::{Deserialize, Serialize};

use crate::platform::{Notifier, PlatformError, VoiceDirectory};

/// One input line: an event with an optional replay timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub event: Inbound,
}

/// One output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Outbound {
    GrantRole {
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    },
    RemoveRole {
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    },
    SwapRoles {
        guild_id: GuildId,
        user_id: UserId,
        grant: RoleId,
        revoke: Vec<RoleId>,
    },
    DirectMessage {
        user_id: UserId,
        content: String,
    },
    ChannelMessage {
        channel_id: ChannelId,
        content: String,
    },
}

pub struct ReplayPlatform<W> {
    out: Mutex<W>,
    voice: Mutex<BTreeMap<GuildId, BTreeMap<ChannelId, VoiceChannelState>>>,
}

impl<W: Write + Send> ReplayPlatform<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            voice: Mutex::new(BTreeMap::new()),
        }
    }

    /// Updates the voice directory from an inbound event.
    pub fn observe(&self, event: &Inbound) {
        let mut voice = lock(&self.voice);
        match event {
            Inbound::GuildAvailable {
                guild_id,
                voice_channels,
            } => {
                let channels = voice_channels
                    .iter()
                    .map(|state| (state.channel_id, state.clone()))
                    .collect();
                voice.insert(*guild_id, channels);
            }
            Inbound::VoiceStateChanged {
                guild_id,
                before,
                after,
                ..
            } => {
                let channels = voice.entry(*guild_id).or_default();
                for state in [before, after].into_iter().flatten() {
                    channels.insert(state.channel_id, state.clone());
                }
            }
            Inbound::GuildRemoved { guild_id } => {
                voice.remove(guild_id);
            }
            Inbound::MessageSent { .. } | Inbound::Scan => {}
        }
    }

    /// Consumes the platform and returns the writer.
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, action: &Outbound) -> Result<(), PlatformError> {
        let line = serde_json::to_string(action)
            .map_err(|err| PlatformError::Unavailable(err.to_string()))?;
        let mut out = lock(&self.out);
        writeln!(out, "{line}")
            .and_then(|()| out.flush())
            .map_err(|err| PlatformError::Unavailable(err.to_string()))
    }
}

#[async_trait]
impl<W: Write + Send> Notifier for ReplayPlatform<W> {
    async fn grant_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError> {
        self.emit(&Outbound::GrantRole {
            guild_id,
            user_id,
            role_id,
        })
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError> {
        self.emit(&Outbound::RemoveRole {
            guild_id,
            user_id,
            role_id,
        })
    }

    async fn swap_roles(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        grant: RoleId,
        revoke: &[RoleId],
    ) -> Result<(), PlatformError> {
        self.emit(&Outbound::SwapRoles {
            guild_id,
            user_id,
            grant,
            revoke: revoke.to_vec(),
        })
    }

    async fn send_direct_message(
        &self,
        user_id: UserId,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.emit(&Outbound::DirectMessage {
            user_id,
            content: content.to_string(),
        })
    }

    async fn send_channel_message(
        &self,
        channel_id: ChannelId,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.emit(&Outbound::ChannelMessage {
            channel_id,
            content: content.to_string(),
        })
    }
}

#[async_trait]
impl<W: Write + Send> VoiceDirectory for ReplayPlatform<W> {
    async fn guilds(&self) -> Result<Vec<GuildId>, PlatformError> {
        Ok(lock(&self.voice).keys().copied().collect())
    }

    async fn voice_channels(
        &self,
        guild_id: GuildId,
    ) -> Result<Vec<VoiceChannelState>, PlatformError> {
        Ok(lock(&self.voice)
            .get(&guild_id)
            .map(|channels| channels.values().cloned().collect())
            .unwrap_or_default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
