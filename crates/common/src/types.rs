//! Common data types for the live-session crates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a value received from a trusted source (the relay or local state).
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Validate and wrap user-supplied input.
            ///
            /// # Errors
            ///
            /// Returns `CommonError::InvalidIdentifier` if the value is empty or
            /// contains whitespace.
            pub fn parse(value: &str) -> Result<Self, CommonError> {
                if value.is_empty() || value.chars().any(char::is_whitespace) {
                    return Err(CommonError::InvalidIdentifier {
                        kind: $kind,
                        value: value.to_string(),
                    });
                }
                Ok(Self(value.to_string()))
            }

            /// Borrow the raw identifier.
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

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Stable identifier of one live class instance
    SessionId,
    "session"
);

string_id!(
    /// Relay-assigned connection identifier of a session member.
    ///
    /// Distinct from any durable user id: a participant gets a fresh one each
    /// time its signaling channel connects. Ordering is plain lexicographic
    /// byte order, which is what the connection tie-break compares.
    ParticipantId,
    "participant"
);

string_id!(
    /// Durable account identifier, independent of connections
    UserId,
    "user"
);

string_id!(
    /// Identifier of the course owning a session and its recordings
    CourseId,
    "course"
);

/// Role of a session member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Presenter of the class
    Tutor,
    /// Attendee
    #[default]
    Student,
    /// Platform administrator
    Admin,
}

impl Role {
    /// Whether this role may issue moderation commands to other members.
    #[must_use]
    pub const fn can_moderate(self) -> bool {
        matches!(self, Self::Tutor | Self::Admin)
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tutor => "tutor",
            Self::Student => "student",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media state a participant declares to everyone else in the session.
///
/// Serialized with the relay's field names (`isVideoOn`, ...). Missing
/// fields default to `false` so older clients that omit a flag still parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFlags {
    /// Camera (or screen) video is being sent
    #[serde(rename = "isVideoOn", alias = "videoOn")]
    pub video_on: bool,
    /// Microphone audio is being sent
    #[serde(rename = "isAudioOn", alias = "audioOn")]
    pub audio_on: bool,
    /// Hand is raised
    #[serde(rename = "isHandRaised", alias = "handRaised")]
    pub hand_raised: bool,
    /// Video track is a display capture
    #[serde(rename = "isScreenSharing", alias = "screenSharing")]
    pub screen_sharing: bool,
    /// A recording job is active on this participant
    #[serde(rename = "isRecording", alias = "recording")]
    pub recording: bool,
}
