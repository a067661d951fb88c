//! Core domain logic for leveling.
//!
//! This crate contains the pure parts of the leveling system:
//! - Levels derived from XP and progress inside a level
//! - Gating rules for who earns XP and how much
//! - The per-guild voice presence state machine
//! - Reward planning on level-up

pub mod event;
pub mod gate;
pub mod level;
pub mod progress;
pub mod reward;
pub mod settings;
pub mod types;
pub mod voice;

pub use event::{Inbound, VoiceTransition};
pub use level::{LevelProgress, level_for_xp, xp_for_level, xp_for_next_level};
pub use progress::{LevelChange, Levels, MemberProgress, ResetScope};
pub use reward::{RewardAction, plan_rewards};
pub use settings::{GuildLevelConfig, LevelReward, Setting, SettingError};
pub use types::{ChannelId, GuildId, RoleId, UserId, ValidationError, XpAxis};
pub use voice::{GuildVoice, VoiceChannelState, VoiceFlush, VoiceMember, VoiceSession};
