//! Strongly-typed ID types for persisted entities.
//!
//! Rows are keyed by database-assigned `BIGINT` identities, so every ID is a
//! thin wrapper around a positive `i64`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to generate a strongly-typed ID wrapper around a row identity.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw row identity.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw row identity.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.trim().parse::<i64>().map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })?;
                if raw <= 0 {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        reason: format!("{raw} is not a positive identity"),
                    });
                }
                Ok(Self(raw))
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Unique identifier for a local user account.
    UserId
);

define_id!(
    /// Unique identifier for a link between a local user and a third-party identity.
    ThirdLinkId
);

define_id!(
    /// Unique identifier for an issued access token.
    UserTokenId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_display_is_the_raw_number() {
        assert_eq!(UserId::new(7).to_string(), "7");
    }

    #[test]
    fn parse_round_trips_display() {
        let id = ThirdLinkId::new(42);
        let parsed: ThirdLinkId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_non_numeric() {
        let result: Result<UserId, _> = "usr_abc".parse();
        let err = result.unwrap_err();
        assert_eq!(err.id_type, "UserId");
    }

    #[test]
    fn parse_rejects_zero_and_negative() {
        assert!("0".parse::<UserId>().is_err());
        assert!("-3".parse::<UserTokenId>().is_err());
    }

    #[test]
    fn id_serializes_as_bare_integer() {
        let json = serde_json::to_string(&UserId::new(9)).expect("serialize");
        assert_eq!(json, "9");
        let parsed: UserId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, UserId::new(9));
    }
}
