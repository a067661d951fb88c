//! Chat platform collaborators.
//!
//! The engine never talks to the platform directly; it goes through these
//! traits so a gateway client, the JSON-lines replay driver and test fakes
//! are interchangeable.

use async_trait::async_trait;
use lvl_core::{ChannelId, GuildId, RoleId, UserId, VoiceChannelState};
use thiserror::Error;

/// Failures reported by the platform.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The bot lacks the permission to perform the action.
    #[error("missing permission: {0}")]
    Permission(String),
    /// The platform could not be reached or rejected the request.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// Role edits and notifications. Every call is best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn grant_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError>;

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError>;

    /// Grants `grant` and revokes `revoke` in one role edit.
    async fn swap_roles(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        grant: RoleId,
        revoke: &[RoleId],
    ) -> Result<(), PlatformError>;

    async fn send_direct_message(&self, user_id: UserId, content: &str)
    -> Result<(), PlatformError>;

    async fn send_channel_message(
        &self,
        channel_id: ChannelId,
        content: &str,
    ) -> Result<(), PlatformError>;
}

/// Read access to voice occupancy, used by the periodic scan.
#[async_trait]
pub trait VoiceDirectory: Send + Sync {
    /// Guilds the bot is currently a member of.
    async fn guilds(&self) -> Result<Vec<GuildId>, PlatformError>;

    /// Every voice channel of the guild with its current occupants.
    async fn voice_channels(
        &self,
        guild_id: GuildId,
    ) -> Result<Vec<VoiceChannelState>, PlatformError>;
}
