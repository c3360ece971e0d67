//! Platform identifiers
//!
//! Every object on the platform is addressed by a "snowflake": an unsigned
//! 64-bit integer that travels over the wire as a decimal string. Parsing a
//! string into one of the typed IDs below is the only validation step the
//! engine performs, so a malformed ID never reaches the store or the API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a string is not a well-formed platform identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} is not a valid ID: {value:?}")]
pub struct IdError {
    /// Which kind of ID we were parsing (`guild_id`, `app_id`, ...)
    pub kind: &'static str,
    /// The rejected input
    pub value: String,
}

/// Parse a decimal snowflake.
///
/// `u64::from_str` alone accepts a leading `+`, so digits are checked first.
fn parse_snowflake(kind: &'static str, value: &str) -> Result<u64, IdError> {
    let err = || IdError {
        kind,
        value: value.to_string(),
    };

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    value.parse().map_err(|_| err())
}

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Field name used in validation errors and log output
            pub const KIND: &'static str = $kind;

            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u64 {
                self.0
            }

            /// Parse and validate a decimal ID string
            pub fn parse(value: &str) -> Result<Self, IdError> {
                parse_snowflake($kind, value).map(Self)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

snowflake!(
    /// A community (guild) on the platform
    GuildId,
    "guild_id"
);
snowflake!(
    /// An application (game/activity) identifier
    AppId,
    "app_id"
);
snowflake!(
    /// A role within a guild
    RoleId,
    "role_id"
);
snowflake!(
    /// A user; combined with a guild it identifies a member
    UserId,
    "user_id"
);
