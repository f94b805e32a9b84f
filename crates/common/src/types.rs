//! Common data types for Rendezvous components.

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum accepted length of a conference identifier.
pub const MAX_CONFERENCE_ID_LENGTH: usize = 64;

/// Unique identifier for a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Create a new random participant ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique, URL-safe identifier for a conference.
///
/// Identifiers are generated server-side; parsing only accepts ASCII
/// alphanumerics plus `-` and `_` so they can be embedded in URLs verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConferenceId(String);

impl ConferenceId {
    /// Parse and validate a conference identifier.
    ///
    /// # Errors
    ///
    /// Returns `CommonError::InvalidIdentifier` for empty, overlong or
    /// non URL-safe input.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() || value.len() > MAX_CONFERENCE_ID_LENGTH {
            return Err(CommonError::InvalidIdentifier(
                "conference id has invalid length".to_string(),
            ));
        }

        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(CommonError::InvalidIdentifier(
                "conference id contains characters that are not URL-safe".to_string(),
            ));
        }

        Ok(Self(value.to_string()))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConferenceId {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ConferenceId> for String {
    fn from(value: ConferenceId) -> Self {
        value.0
    }
}

impl fmt::Display for ConferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned identifier for a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Store-assigned identifier for a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
