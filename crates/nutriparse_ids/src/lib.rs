//! Identifier newtypes for nutriparse.
//!
//! Ids wrap a [`Uuid`] rather than a string: equality, ordering, and
//! hashing come from the 128-bit value, and a parsed id is canonical by
//! construction (hyphenated lowercase on output regardless of the input
//! spelling).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum IdError {
    #[error("{label} must not be empty")]
    Empty { label: &'static str },
    #[error("{label} is not a valid UUID: {source}")]
    Malformed {
        label: &'static str,
        #[source]
        source: uuid::Error,
    },
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(into = "String", try_from = "String")]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh random (v4) id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse a caller-supplied id, canonicalizing its form.
            pub fn parse(value: &str) -> Result<Self, IdError> {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(IdError::Empty { label: $label });
                }
                Uuid::parse_str(trimmed)
                    .map(Self)
                    .map_err(|source| IdError::Malformed {
                        label: $label,
                        source,
                    })
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Canonical hyphenated lowercase form.
            pub fn as_str(&self) -> String {
                self.0.as_hyphenated().to_string()
            }

            /// First segment of the uuid, for compact log lines.
            pub fn short(&self) -> String {
                let full = self.as_str();
                full.split('-').next().unwrap_or(&full).to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.as_hyphenated().fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }
    };
}

uuid_id!(
    /// Identity of one parsing job.
    JobId,
    "job id"
);
uuid_id!(
    /// Grouping key for a batch submission.
    BatchId,
    "batch id"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonicalizes_case_and_whitespace() {
        let id = JobId::new();
        let shouted = format!("  {}  ", id.as_str().to_uppercase());
        let parsed = JobId::parse(&shouted).expect("uppercase with padding parses");
        assert_eq!(parsed, id);
        assert_eq!(parsed.as_str(), id.as_str());
    }

    #[test]
    fn empty_and_garbage_are_distinct_errors() {
        assert!(matches!(JobId::parse("   "), Err(IdError::Empty { .. })));
        assert!(matches!(
            BatchId::parse("not-a-uuid"),
            Err(IdError::Malformed { .. })
        ));
    }

    #[test]
    fn serde_round_trips_as_string() {
        let id = BatchId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_str()));
        let back: BatchId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn serde_rejects_malformed_input() {
        assert!(serde_json::from_str::<JobId>("\"nope\"").is_err());
    }

    #[test]
    fn short_form_is_a_prefix() {
        let id = JobId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.as_str().starts_with(&id.short()));
    }
}
