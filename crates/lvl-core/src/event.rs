//! Inbound platform events.

use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, GuildId, RoleId, UserId};
use crate::voice::{VoiceChannelState, VoiceMember};

/// An event delivered by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// A member posted a message in a text channel.
    MessageSent {
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
        #[serde(default)]
        is_bot: bool,
        #[serde(default)]
        roles: Vec<RoleId>,
    },
    /// A member's voice state changed. Channel states carry the occupancy
    /// after the change.
    VoiceStateChanged {
        guild_id: GuildId,
        member: VoiceMember,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<VoiceChannelState>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<VoiceChannelState>,
    },
    /// A guild became available, with the occupancy of all its voice channels.
    GuildAvailable {
        guild_id: GuildId,
        #[serde(default)]
        voice_channels: Vec<VoiceChannelState>,
    },
    /// The bot left or lost access to a guild.
    GuildRemoved { guild_id: GuildId },
    /// Run the periodic voice scan now.
    Scan,
}

impl Inbound {
    /// Guild the event concerns, if it is guild scoped.
    #[must_use]
    pub const fn guild_id(&self) -> Option<GuildId> {
        match self {
            Self::MessageSent { guild_id, .. }
            | Self::VoiceStateChanged { guild_id, .. }
            | Self::GuildAvailable { guild_id, .. }
            | Self::GuildRemoved { guild_id } => Some(*guild_id),
            Self::Scan => None,
        }
    }
}

/// What a voice state change means for presence tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceTransition<'a> {
    Joined {
        to: &'a VoiceChannelState,
    },
    Left {
        from: &'a VoiceChannelState,
    },
    Moved {
        from: &'a VoiceChannelState,
        to: &'a VoiceChannelState,
    },
    /// Mute, deafen, stream toggles and the like. The channel is unchanged
    /// but its occupancy is re-read.
    StateChanged {
        channel: &'a VoiceChannelState,
    },
    /// Neither side names a channel.
    Disconnected,
}

impl<'a> VoiceTransition<'a> {
    #[must_use]
    pub fn classify(
        before: Option<&'a VoiceChannelState>,
        after: Option<&'a VoiceChannelState>,
    ) -> Self {
        match (before, after) {
            (None, Some(to)) => Self::Joined { to },
            (Some(from), None) => Self::Left { from },
            (Some(from), Some(to)) if from.channel_id != to.channel_id => Self::Moved { from, to },
            (Some(_), Some(channel)) => Self::StateChanged { channel },
            (None, None) => Self::Disconnected,
        }
    }
}
