//! Core type definitions with validation.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided id was zero.
    #[error("{field} cannot be zero")]
    Zero { field: &'static str },

    /// The provided id was not an unsigned integer.
    #[error("invalid {field}: {value}")]
    Malformed { field: &'static str, value: String },

    /// Invalid XP axis value.
    #[error("invalid xp axis: {value}")]
    InvalidAxis { value: String },
}

/// Generates a validated snowflake ID newtype with common trait implementations.
///
/// Snowflakes are the platform's 64-bit ids. Zero is never a valid id.
/// Values are stored in SQLite as INTEGER, which caps them at `i64::MAX`.
macro_rules! define_snowflake_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "u64", into = "u64")]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: u64) -> Result<Self, ValidationError> {
                if id == 0 {
                    return Err(ValidationError::Zero { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the raw id.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl TryFrom<u64> for $name {
            type Error = ValidationError;

            fn try_from(value: u64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s.trim().parse::<u64>().map_err(|_| ValidationError::Malformed {
                    field: $field_name,
                    value: s.to_string(),
                })?;
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                let value = i64::try_from(self.0)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
                Ok(ToSqlOutput::from(value))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let raw = i64::column_result(value)?;
                let raw = u64::try_from(raw).map_err(|_| FromSqlError::OutOfRange(raw))?;
                Self::new(raw).map_err(|err| FromSqlError::Other(Box::new(err)))
            }
        }
    };
}

define_snowflake_id!(
    /// A guild (community server) identifier. The unit of configuration isolation.
    GuildId, "guild ID"
);

define_snowflake_id!(
    /// A member identifier.
    UserId, "user ID"
);

define_snowflake_id!(
    /// A text or voice channel identifier.
    ChannelId, "channel ID"
);

define_snowflake_id!(
    /// A role identifier.
    RoleId, "role ID"
);

/// Which activity an XP amount belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XpAxis {
    /// Messages sent in text channels.
    Text,
    /// Minutes spent in occupied voice channels.
    Voice,
}

impl XpAxis {
    /// String representation for storage and display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
        }
    }

    /// Capitalized label used in announcements.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Voice => "Voice",
        }
    }
}

impl fmt::Display for XpAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for XpAxis {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "voice" => Ok(Self::Voice),
            _ => Err(ValidationError::InvalidAxis {
                value: s.to_string(),
            }),
        }
    }
}
