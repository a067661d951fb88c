//! Activity gatekeeper: who may earn XP, when, and how much.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::settings::GuildLevelConfig;
use crate::types::{ChannelId, RoleId, XpAxis};

/// Returns whether activity on `axis` by a member holding `roles` in
/// `channel` may earn XP at all.
#[must_use]
pub fn should_give_xp(
    config: &GuildLevelConfig,
    axis: XpAxis,
    roles: &[RoleId],
    channel: ChannelId,
) -> bool {
    let enabled = match axis {
        XpAxis::Text => config.text_xp_enabled,
        XpAxis::Voice => config.voice_xp_enabled,
    };
    if !enabled {
        return false;
    }
    if roles.iter().any(|role| config.exempt_roles.contains(role)) {
        return false;
    }
    !config.exempt_channels.contains(&channel)
}

/// Per-member sliding-window rate limit for text XP.
///
/// A member with no previous award may always earn; otherwise at least
/// `cooldown_secs` must have elapsed since the last award.
#[must_use]
pub fn can_gain_text_xp(
    last_award: Option<DateTime<Utc>>,
    cooldown_secs: i64,
    now: DateTime<Utc>,
) -> bool {
    last_award.is_none_or(|last| now.signed_duration_since(last).num_seconds() >= cooldown_secs)
}

/// Rolls the XP for one message: `floor(uniform(min, max) × multiplier)`.
pub fn roll_text_xp<R: Rng + ?Sized>(config: &GuildLevelConfig, rng: &mut R) -> i64 {
    let (low, high) = if config.text_xp_min <= config.text_xp_max {
        (config.text_xp_min, config.text_xp_max)
    } else {
        (config.text_xp_max, config.text_xp_min)
    };
    let base = rng.gen_range(low..=high);
    scale(base, config.multiplier)
}

/// XP for a closed voice session: `floor(minutes × rate × multiplier)`.
#[must_use]
pub fn voice_xp(config: &GuildLevelConfig, minutes: i64) -> i64 {
    scale(minutes.saturating_mul(config.voice_xp_rate), config.multiplier)
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "award amounts are far below 2^52 and the result is floored on purpose"
)]
fn scale(base: i64, multiplier: f64) -> i64 {
    let scaled = (base as f64 * multiplier).floor();
    if scaled.is_finite() && scaled > 0.0 {
        scaled as i64
    } else {
        0
    }
}
