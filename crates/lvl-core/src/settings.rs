//! Per-guild leveling settings and reward rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChannelId, GuildId, RoleId, ValidationError};

/// Errors raised while editing guild settings.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettingError {
    /// The setting name is not recognised.
    #[error("unknown setting: {0}")]
    UnknownSetting(String),
    /// The value could not be parsed for this setting.
    #[error("invalid value for {setting}: {value}")]
    InvalidValue { setting: Setting, value: String },
    /// The value parsed but lies outside the allowed range.
    #[error("{setting} must be between {min} and {max}, got {value}")]
    OutOfRange {
        setting: Setting,
        min: f64,
        max: f64,
        value: f64,
    },
    /// The minimum text XP would exceed the maximum.
    #[error("text_xp_min ({min}) cannot exceed text_xp_max ({max})")]
    InvertedRange { min: i64, max: i64 },
    /// An id inside a list value was invalid.
    #[error(transparent)]
    Id(#[from] ValidationError),
}

/// Leveling configuration of one guild.
///
/// A guild without a stored row uses [`GuildLevelConfig::new`] defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildLevelConfig {
    pub guild_id: GuildId,
    pub text_xp_enabled: bool,
    pub voice_xp_enabled: bool,
    pub text_xp_min: i64,
    pub text_xp_max: i64,
    /// XP per full minute of tracked voice time.
    pub voice_xp_rate: i64,
    pub text_cooldown_secs: i64,
    pub multiplier: f64,
    pub exempt_roles: Vec<RoleId>,
    pub exempt_channels: Vec<ChannelId>,
    pub level_up_messages: bool,
    pub level_up_channel: Option<ChannelId>,
}

impl GuildLevelConfig {
    pub const DEFAULT_TEXT_XP_MIN: i64 = 15;
    pub const DEFAULT_TEXT_XP_MAX: i64 = 25;
    pub const DEFAULT_VOICE_XP_RATE: i64 = 5;
    pub const DEFAULT_TEXT_COOLDOWN_SECS: i64 = 60;

    /// Default configuration for a guild.
    #[must_use]
    pub const fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            text_xp_enabled: true,
            voice_xp_enabled: true,
            text_xp_min: Self::DEFAULT_TEXT_XP_MIN,
            text_xp_max: Self::DEFAULT_TEXT_XP_MAX,
            voice_xp_rate: Self::DEFAULT_VOICE_XP_RATE,
            text_cooldown_secs: Self::DEFAULT_TEXT_COOLDOWN_SECS,
            multiplier: 1.0,
            exempt_roles: Vec::new(),
            exempt_channels: Vec::new(),
            level_up_messages: true,
            level_up_channel: None,
        }
    }

    /// Applies a textual setting update, validating ranges.
    ///
    /// On error the configuration is left unchanged.
    pub fn apply(&mut self, setting: Setting, value: &str) -> Result<(), SettingError> {
        let value = value.trim();
        match setting {
            Setting::TextXpMin => {
                let min = parse_int(setting, value, 1, 100)?;
                if min > self.text_xp_max {
                    return Err(SettingError::InvertedRange {
                        min,
                        max: self.text_xp_max,
                    });
                }
                self.text_xp_min = min;
            }
            Setting::TextXpMax => {
                let max = parse_int(setting, value, 1, 100)?;
                if max < self.text_xp_min {
                    return Err(SettingError::InvertedRange {
                        min: self.text_xp_min,
                        max,
                    });
                }
                self.text_xp_max = max;
            }
            Setting::VoiceXpRate => self.voice_xp_rate = parse_int(setting, value, 1, 50)?,
            Setting::TextCooldown => self.text_cooldown_secs = parse_int(setting, value, 30, 300)?,
            Setting::Multiplier => {
                let multiplier: f64 = value.parse().map_err(|_| invalid(setting, value))?;
                if !(0.1..=5.0).contains(&multiplier) {
                    return Err(SettingError::OutOfRange {
                        setting,
                        min: 0.1,
                        max: 5.0,
                        value: multiplier,
                    });
                }
                self.multiplier = multiplier;
            }
            Setting::LevelUpMessages => self.level_up_messages = parse_flag(setting, value)?,
            Setting::TextXpEnabled => self.text_xp_enabled = parse_flag(setting, value)?,
            Setting::VoiceXpEnabled => self.voice_xp_enabled = parse_flag(setting, value)?,
            Setting::LevelUpChannel => {
                self.level_up_channel = if is_none(value) {
                    None
                } else {
                    Some(value.parse()?)
                };
            }
            Setting::ExemptRoles => self.exempt_roles = parse_id_list(value)?,
            Setting::ExemptChannels => self.exempt_channels = parse_id_list(value)?,
        }
        Ok(())
    }

    /// Current value of `setting`, in the form [`apply`](Self::apply) accepts.
    #[must_use]
    pub fn value_of(&self, setting: Setting) -> String {
        match setting {
            Setting::TextXpMin => self.text_xp_min.to_string(),
            Setting::TextXpMax => self.text_xp_max.to_string(),
            Setting::VoiceXpRate => self.voice_xp_rate.to_string(),
            Setting::TextCooldown => self.text_cooldown_secs.to_string(),
            Setting::Multiplier => self.multiplier.to_string(),
            Setting::LevelUpMessages => self.level_up_messages.to_string(),
            Setting::TextXpEnabled => self.text_xp_enabled.to_string(),
            Setting::VoiceXpEnabled => self.voice_xp_enabled.to_string(),
            Setting::LevelUpChannel => self
                .level_up_channel
                .map_or_else(|| "none".to_string(), |channel| channel.to_string()),
            Setting::ExemptRoles => join_ids(&self.exempt_roles),
            Setting::ExemptChannels => join_ids(&self.exempt_channels),
        }
    }
}

fn join_ids<T: fmt::Display>(ids: &[T]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// An editable guild setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    TextXpMin,
    TextXpMax,
    VoiceXpRate,
    TextCooldown,
    Multiplier,
    LevelUpMessages,
    TextXpEnabled,
    VoiceXpEnabled,
    LevelUpChannel,
    ExemptRoles,
    ExemptChannels,
}

impl Setting {
    pub const ALL: [Self; 11] = [
        Self::TextXpMin,
        Self::TextXpMax,
        Self::VoiceXpRate,
        Self::TextCooldown,
        Self::Multiplier,
        Self::LevelUpMessages,
        Self::TextXpEnabled,
        Self::VoiceXpEnabled,
        Self::LevelUpChannel,
        Self::ExemptRoles,
        Self::ExemptChannels,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TextXpMin => "text_xp_min",
            Self::TextXpMax => "text_xp_max",
            Self::VoiceXpRate => "voice_xp_rate",
            Self::TextCooldown => "text_cooldown",
            Self::Multiplier => "multiplier",
            Self::LevelUpMessages => "level_up_messages",
            Self::TextXpEnabled => "text_xp_enabled",
            Self::VoiceXpEnabled => "voice_xp_enabled",
            Self::LevelUpChannel => "level_up_channel",
            Self::ExemptRoles => "exempt_roles",
            Self::ExemptChannels => "exempt_channels",
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Setting {
    type Err = SettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|setting| setting.as_str() == s)
            .ok_or_else(|| SettingError::UnknownSetting(s.to_string()))
    }
}

fn invalid(setting: Setting, value: &str) -> SettingError {
    SettingError::InvalidValue {
        setting,
        value: value.to_string(),
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "range bounds are small integers"
)]
fn parse_int(setting: Setting, value: &str, min: i64, max: i64) -> Result<i64, SettingError> {
    let parsed: i64 = value.parse().map_err(|_| invalid(setting, value))?;
    if !(min..=max).contains(&parsed) {
        return Err(SettingError::OutOfRange {
            setting,
            min: min as f64,
            max: max as f64,
            value: parsed as f64,
        });
    }
    Ok(parsed)
}

fn parse_flag(setting: Setting, value: &str) -> Result<bool, SettingError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enable" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disable" | "disabled" => Ok(false),
        _ => Err(invalid(setting, value)),
    }
}

fn is_none(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("none")
}

fn parse_id_list<T>(value: &str) -> Result<Vec<T>, SettingError>
where
    T: FromStr<Err = ValidationError> + Ord,
{
    if is_none(value) {
        return Ok(Vec::new());
    }
    let mut ids = value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<T>, _>>()?;
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// A role granted automatically once level thresholds are reached.
///
/// A threshold of `0` means the axis is not required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelReward {
    pub id: i64,
    pub guild_id: GuildId,
    pub role_id: RoleId,
    pub required_text_level: u32,
    pub required_voice_level: u32,
    /// Revoke lower reward roles when this one is granted.
    pub remove_previous: bool,
    pub notify_by_dm: bool,
}

impl LevelReward {
    /// Combined threshold used to order rewards.
    #[must_use]
    pub fn threshold(&self) -> u64 {
        u64::from(self.required_text_level) + u64::from(self.required_voice_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GuildLevelConfig {
        GuildLevelConfig::new(GuildId::new(1).unwrap())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = config();
        assert!(config.text_xp_enabled);
        assert!(config.voice_xp_enabled);
        assert_eq!(config.text_xp_min, 15);
        assert_eq!(config.text_xp_max, 25);
        assert_eq!(config.text_cooldown_secs, 60);
        assert!(config.exempt_roles.is_empty());
        assert!(config.level_up_channel.is_none());
    }

    #[test]
    fn setting_names_roundtrip() {
        for setting in Setting::ALL {
            assert_eq!(setting.as_str().parse::<Setting>().unwrap(), setting);
        }
        assert!("xp_boost".parse::<Setting>().is_err());
    }

    #[test]
    fn apply_enforces_ranges() {
        let mut config = config();
        assert!(config.apply(Setting::TextCooldown, "10").is_err());
        assert!(config.apply(Setting::TextCooldown, "120").is_ok());
        assert_eq!(config.text_cooldown_secs, 120);

        assert!(config.apply(Setting::VoiceXpRate, "51").is_err());
        assert!(config.apply(Setting::Multiplier, "6.5").is_err());
        assert!(config.apply(Setting::Multiplier, "abc").is_err());
        config.apply(Setting::Multiplier, "1.5").unwrap();
        assert!((config.multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn apply_rejects_inverted_text_range() {
        let mut config = config();
        let err = config.apply(Setting::TextXpMin, "30").unwrap_err();
        assert_eq!(err, SettingError::InvertedRange { min: 30, max: 25 });
        assert_eq!(config.text_xp_min, 15);

        config.apply(Setting::TextXpMax, "40").unwrap();
        config.apply(Setting::TextXpMin, "30").unwrap();
        assert_eq!((config.text_xp_min, config.text_xp_max), (30, 40));
    }

    #[test]
    fn apply_parses_flags_and_lists() {
        let mut config = config();
        config.apply(Setting::LevelUpMessages, "off").unwrap();
        assert!(!config.level_up_messages);
        config.apply(Setting::VoiceXpEnabled, "Enabled").unwrap();
        assert!(config.voice_xp_enabled);
        let err = config.apply(Setting::LevelUpMessages, "ture").unwrap_err();
        assert_eq!(
            err,
            SettingError::InvalidValue {
                setting: Setting::LevelUpMessages,
                value: "ture".to_string(),
            }
        );
        assert!(!config.level_up_messages);

        config.apply(Setting::ExemptRoles, "30, 10,30").unwrap();
        assert_eq!(
            config.exempt_roles,
            vec![RoleId::new(10).unwrap(), RoleId::new(30).unwrap()]
        );
        config.apply(Setting::ExemptRoles, "none").unwrap();
        assert!(config.exempt_roles.is_empty());

        assert!(config.apply(Setting::ExemptChannels, "5,x").is_err());

        config.apply(Setting::LevelUpChannel, "77").unwrap();
        assert_eq!(config.level_up_channel, Some(ChannelId::new(77).unwrap()));
        config.apply(Setting::LevelUpChannel, "none").unwrap();
        assert!(config.level_up_channel.is_none());
    }

    #[test]
    fn value_of_feeds_back_into_apply() {
        let mut config = config();
        config.apply(Setting::ExemptChannels, "9,4").unwrap();
        config.apply(Setting::Multiplier, "1.25").unwrap();
        assert_eq!(config.value_of(Setting::ExemptChannels), "4,9");
        assert_eq!(config.value_of(Setting::ExemptRoles), "none");
        assert_eq!(config.value_of(Setting::Multiplier), "1.25");

        let mut copy = GuildLevelConfig::new(config.guild_id);
        for setting in Setting::ALL {
            copy.apply(setting, &config.value_of(setting)).unwrap();
        }
        assert_eq!(copy, config);
    }
}
