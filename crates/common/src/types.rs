//! Identifier types shared by the coordinator and its test utilities.
//!
//! Meeting, user and peer identifiers arrive from clients as opaque strings,
//! so they are string newtypes validated once at the edge with `parse`.
//! Connection and participant identifiers are minted server-side.

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a client-supplied identifier.
pub const MAX_IDENTIFIER_LEN: usize = 128;

fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CommonError::InvalidIdentifier(format!("{kind} is empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(CommonError::InvalidIdentifier(format!(
            "{kind} exceeds {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(CommonError::InvalidIdentifier(format!(
            "{kind} contains control characters"
        )));
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a client-supplied identifier.
            ///
            /// # Errors
            ///
            /// Returns `CommonError::InvalidIdentifier` if the value is empty,
            /// longer than [`MAX_IDENTIFIER_LEN`], or contains control characters.
            pub fn parse(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                validate_identifier($kind, &value)?;
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a meeting, owned by the storage collaborator.
    MeetingId,
    "meeting id"
);

string_id!(
    /// Account identifier of a user, as asserted by an auth token.
    UserId,
    "user id"
);

string_id!(
    /// Client-chosen identifier used to address signaling messages.
    PeerId,
    "peer id"
);

/// Server-minted identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a participant record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
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
