//! Level calculator.
//!
//! Level *k* requires `100·k²` XP, so `level(xp) = floor(sqrt(xp / 100))`.
//! Levels are never stored independently of XP: every write that changes XP
//! recomputes the level with [`level_for_xp`].

use serde::{Deserialize, Serialize};

/// XP per squared level.
const XP_PER_LEVEL_SQUARED: i64 = 100;

/// Returns the level reached with `xp` experience points.
///
/// Negative XP is treated as zero.
#[must_use]
pub fn level_for_xp(xp: i64) -> u32 {
    if xp < XP_PER_LEVEL_SQUARED {
        return 0;
    }
    let level = (xp / XP_PER_LEVEL_SQUARED).isqrt();
    u32::try_from(level).unwrap_or(u32::MAX)
}

/// Returns the minimum XP needed to reach `level`.
#[must_use]
pub fn xp_for_level(level: u32) -> i64 {
    let level = i64::from(level);
    level.saturating_mul(level).saturating_mul(XP_PER_LEVEL_SQUARED)
}

/// Progress of a single XP axis toward its next level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgress {
    /// Current level.
    pub level: u32,
    /// XP threshold of the next level.
    pub next_level_xp: i64,
    /// XP still missing to reach the next level.
    pub remaining: i64,
    /// XP earned since the current level was reached.
    pub into_level: i64,
    /// XP span between the current and the next level.
    pub level_span: i64,
}

/// Returns `(current_level, next_level_threshold, remaining)` for `xp`.
#[must_use]
pub fn xp_for_next_level(xp: i64) -> (u32, i64, i64) {
    let progress = LevelProgress::for_xp(xp);
    (progress.level, progress.next_level_xp, progress.remaining)
}

impl LevelProgress {
    /// Computes progress for the given XP total.
    #[must_use]
    pub fn for_xp(xp: i64) -> Self {
        let xp = xp.max(0);
        let level = level_for_xp(xp);
        let current_level_xp = xp_for_level(level);
        let next_level_xp = xp_for_level(level.saturating_add(1));
        Self {
            level,
            next_level_xp,
            remaining: next_level_xp - xp,
            into_level: xp - current_level_xp,
            level_span: next_level_xp - current_level_xp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_first_threshold_is_level_zero() {
        assert_eq!(level_for_xp(0), 0);
        assert_eq!(level_for_xp(99), 0);
        assert_eq!(level_for_xp(-50), 0);
    }

    #[test]
    fn thresholds_match_square_formula() {
        assert_eq!(level_for_xp(100), 1);
        assert_eq!(level_for_xp(399), 1);
        assert_eq!(level_for_xp(400), 2);
        assert_eq!(level_for_xp(900), 3);
        assert_eq!(level_for_xp(10_000), 10);
    }

    #[test]
    fn level_is_monotonic() {
        let mut previous = 0;
        for xp in 0..50_000 {
            let level = level_for_xp(xp);
            assert!(level >= previous, "level dropped at xp {xp}");
            previous = level;
        }
    }

    #[test]
    fn level_of_required_xp_is_fixed_point() {
        for xp in (0..200_000).step_by(37) {
            let level = level_for_xp(xp);
            assert_eq!(level_for_xp(xp_for_level(level)), level);
        }
    }

    #[test]
    fn required_xp_boundaries() {
        for level in 0..=1_000_u32 {
            let required = xp_for_level(level);
            assert_eq!(required, 100 * i64::from(level) * i64::from(level));
            assert_eq!(level_for_xp(required), level);
            if level > 0 {
                assert_eq!(level_for_xp(required - 1), level - 1);
            }
        }
    }

    #[test]
    fn large_xp_does_not_overflow() {
        assert_eq!(level_for_xp(i64::MAX), 303_700_049);
        assert_eq!(xp_for_level(u32::MAX), i64::MAX);
    }

    #[test]
    fn next_level_progress() {
        assert_eq!(xp_for_next_level(0), (0, 100, 100));
        assert_eq!(xp_for_next_level(150), (1, 400, 250));
        assert_eq!(xp_for_next_level(400), (2, 900, 500));

        insta::assert_debug_snapshot!(LevelProgress::for_xp(150), @r"
        LevelProgress {
            level: 1,
            next_level_xp: 400,
            remaining: 250,
            into_level: 50,
            level_span: 300,
        }
        ");
    }
}
