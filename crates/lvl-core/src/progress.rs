//! Per-member XP accumulators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::level::{LevelProgress, level_for_xp, xp_for_level};
use crate::types::{GuildId, UserId, XpAxis};

/// Persistent progress of one member in one guild.
///
/// Levels are a cache of [`level_for_xp`]; every method that touches XP
/// recomputes the matching level before returning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProgress {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub text_xp: i64,
    pub voice_xp: i64,
    pub text_level: u32,
    pub voice_level: u32,
    pub total_messages: i64,
    pub total_voice_minutes: i64,
    pub last_text_xp_at: Option<DateTime<Utc>>,
    pub last_voice_update_at: Option<DateTime<Utc>>,
}

/// Current levels on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Levels {
    pub text: u32,
    pub voice: u32,
}

impl Levels {
    #[must_use]
    pub const fn get(&self, axis: XpAxis) -> u32 {
        match axis {
            XpAxis::Text => self.text,
            XpAxis::Voice => self.voice,
        }
    }
}

/// Level transition produced by an XP write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub axis: XpAxis,
    pub old: u32,
    pub new: u32,
}

impl LevelChange {
    #[must_use]
    pub const fn is_level_up(&self) -> bool {
        self.new > self.old
    }
}

/// Which accumulators an administrative reset clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    All,
    Axis(XpAxis),
}

impl MemberProgress {
    /// Empty progress for a member that has not earned anything yet.
    #[must_use]
    pub const fn new(guild_id: GuildId, user_id: UserId) -> Self {
        Self {
            guild_id,
            user_id,
            text_xp: 0,
            voice_xp: 0,
            text_level: 0,
            voice_level: 0,
            total_messages: 0,
            total_voice_minutes: 0,
            last_text_xp_at: None,
            last_voice_update_at: None,
        }
    }

    #[must_use]
    pub const fn levels(&self) -> Levels {
        Levels {
            text: self.text_level,
            voice: self.voice_level,
        }
    }

    #[must_use]
    pub const fn xp(&self, axis: XpAxis) -> i64 {
        match axis {
            XpAxis::Text => self.text_xp,
            XpAxis::Voice => self.voice_xp,
        }
    }

    #[must_use]
    pub const fn total_xp(&self) -> i64 {
        self.text_xp.saturating_add(self.voice_xp)
    }

    #[must_use]
    pub fn progress(&self, axis: XpAxis) -> LevelProgress {
        LevelProgress::for_xp(self.xp(axis))
    }

    /// Records one XP-earning message.
    pub fn add_text_xp(&mut self, xp: i64, now: DateTime<Utc>) -> LevelChange {
        self.total_messages += 1;
        self.last_text_xp_at = Some(now);
        self.add_xp(XpAxis::Text, xp)
    }

    /// Records a closed voice session of `minutes` whole minutes.
    pub fn add_voice_xp(&mut self, xp: i64, minutes: i64, now: DateTime<Utc>) -> LevelChange {
        self.total_voice_minutes += minutes.max(0);
        self.last_voice_update_at = Some(now);
        self.add_xp(XpAxis::Voice, xp)
    }

    /// Overwrites XP on one axis. Administrative only: bypasses monotonicity.
    pub fn set_xp(&mut self, axis: XpAxis, xp: i64) -> LevelChange {
        let old = self.levels().get(axis);
        *self.xp_mut(axis) = xp.max(0);
        self.recompute(axis);
        LevelChange {
            axis,
            old,
            new: self.levels().get(axis),
        }
    }

    /// Sets XP to exactly the threshold of `level`.
    pub fn set_level(&mut self, axis: XpAxis, level: u32) -> LevelChange {
        self.set_xp(axis, xp_for_level(level))
    }

    /// Clears accumulators for the given scope.
    pub fn reset(&mut self, scope: ResetScope) {
        match scope {
            ResetScope::All => {
                *self = Self::new(self.guild_id, self.user_id);
            }
            ResetScope::Axis(XpAxis::Text) => {
                self.set_xp(XpAxis::Text, 0);
                self.total_messages = 0;
                self.last_text_xp_at = None;
            }
            ResetScope::Axis(XpAxis::Voice) => {
                self.set_xp(XpAxis::Voice, 0);
                self.total_voice_minutes = 0;
                self.last_voice_update_at = None;
            }
        }
    }

    fn add_xp(&mut self, axis: XpAxis, xp: i64) -> LevelChange {
        let old = self.levels().get(axis);
        let slot = self.xp_mut(axis);
        *slot = slot.saturating_add(xp.max(0));
        self.recompute(axis);
        LevelChange {
            axis,
            old,
            new: self.levels().get(axis),
        }
    }

    fn xp_mut(&mut self, axis: XpAxis) -> &mut i64 {
        match axis {
            XpAxis::Text => &mut self.text_xp,
            XpAxis::Voice => &mut self.voice_xp,
        }
    }

    fn recompute(&mut self, axis: XpAxis) {
        match axis {
            XpAxis::Text => self.text_level = level_for_xp(self.text_xp),
            XpAxis::Voice => self.voice_level = level_for_xp(self.voice_xp),
        }
    }
}
