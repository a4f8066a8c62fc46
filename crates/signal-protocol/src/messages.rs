//! Relay events in both directions.

use chrono::{DateTime, TimeZone, Utc};
use common::types::{CourseId, MediaFlags, ParticipantId, Role, SessionId, UserId};
use serde::{Deserialize, Serialize};

use crate::envelope::SignalEnvelope;
use crate::whiteboard::WhiteboardOp;

/// Moderation action a tutor or admin can apply to another member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdminAction {
    /// Force the target's microphone off
    Mute,
    /// Remove the target from the session
    Kick,
    /// Ask the target to turn the microphone back on
    RequestUnmute,
}

impl AdminAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Kick => "kick",
            Self::RequestUnmute => "request-unmute",
        }
    }
}

/// A member as announced by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAnnouncement {
    /// Relay-assigned connection id
    #[serde(rename = "socketId", alias = "participantId")]
    pub participant_id: ParticipantId,
    /// Durable account id, when the relay knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Member role
    #[serde(rename = "userRole", alias = "role", default)]
    pub role: Role,
    /// Display name
    #[serde(rename = "userName", alias = "name", default)]
    pub name: String,
    /// Declared media flags
    #[serde(flatten)]
    pub flags: MediaFlags,
}

/// Body of events that only name the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    /// Target session
    pub session_id: SessionId,
}

/// `join-session` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSession {
    /// Session to join
    pub session_id: SessionId,
    /// Durable account id of the joining user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Role of the joining user
    pub user_role: Role,
    /// Display name
    pub user_name: String,
    /// Owning course
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<CourseId>,
    /// Owning course title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_name: Option<String>,
    /// Course category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Media flags at the time of (re)join
    #[serde(flatten)]
    pub flags: MediaFlags,
}

/// `stream-state-change` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStateChange {
    /// Session the change applies to
    pub session_id: SessionId,
    /// Full new flag set
    #[serde(flatten)]
    pub flags: MediaFlags,
}

/// `hand-raised-change` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandRaisedChange {
    /// Session the change applies to
    pub session_id: SessionId,
    /// New hand state
    pub is_hand_raised: bool,
}

/// `admin-action` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminActionRequest {
    /// Session the action applies to
    pub session_id: SessionId,
    /// What to do
    pub action: AdminAction,
    /// Member to act on
    pub target_id: ParticipantId,
}

/// Outbound `whiteboard-draw` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteboardDraw {
    /// Session whose board is drawn on
    pub session_id: SessionId,
    /// The operation
    #[serde(flatten)]
    pub op: WhiteboardOp,
}

/// Events sent by a participant to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Enter a session, or re-enter after reconnecting
    JoinSession(JoinSession),
    /// Ask for the current membership snapshot
    GetSessionUsers(SessionRef),
    /// Negotiation envelope for one peer
    Signal(SignalEnvelope),
    /// Broadcast the local flag set
    StreamStateChange(StreamStateChange),
    /// Broadcast the local hand state
    HandRaisedChange(HandRaisedChange),
    /// Moderation request
    AdminAction(AdminActionRequest),
    /// Broadcast a whiteboard operation
    WhiteboardDraw(WhiteboardDraw),
    /// Leave the session
    LeaveSession(SessionRef),
}

impl ClientMessage {
    /// Wire event name, used in logs and metrics.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::JoinSession(_) => "join-session",
            Self::GetSessionUsers(_) => "get-session-users",
            Self::Signal(_) => "signal",
            Self::StreamStateChange(_) => "stream-state-change",
            Self::HandRaisedChange(_) => "hand-raised-change",
            Self::AdminAction(_) => "admin-action",
            Self::WhiteboardDraw(_) => "whiteboard-draw",
            Self::LeaveSession(_) => "leave-session",
        }
    }
}

/// `connected` body: the relay confirming the channel and naming our id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    /// Connection id the relay assigned to this channel
    pub connection_id: ParticipantId,
}

/// `user-left` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    /// Member that left
    #[serde(rename = "socketId", alias = "participantId")]
    pub participant_id: ParticipantId,
}

/// `stream-state-changed` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStateChanged {
    /// Member whose flags changed
    #[serde(rename = "socketId", alias = "participantId")]
    pub participant_id: ParticipantId,
    /// Full new flag set
    #[serde(flatten)]
    pub flags: MediaFlags,
}

/// `hand-raised-changed` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandRaisedChanged {
    /// Member whose hand state changed
    #[serde(rename = "socketId", alias = "participantId")]
    pub participant_id: ParticipantId,
    /// New hand state
    pub is_hand_raised: bool,
}

/// Session start as sent by the relay: epoch milliseconds or an RFC 3339 string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartTime {
    /// Milliseconds since the Unix epoch
    EpochMillis(i64),
    /// RFC 3339 timestamp
    Text(String),
}

impl StartTime {
    /// Resolve to a UTC timestamp, `None` when the value is unparseable.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::EpochMillis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// `session-info` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Authoritative session start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<StartTime>,
}

/// `admin-command` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCommand {
    /// What to do
    pub action: AdminAction,
    /// Member the command is meant for. Relays that route per target may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ParticipantId>,
    /// Moderator that issued the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ParticipantId>,
}

/// Inbound `whiteboard-draw` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteboardBroadcast {
    /// Member that drew
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ParticipantId>,
    /// The operation
    #[serde(flatten)]
    pub op: WhiteboardOp,
}

/// `error` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayError {
    /// Human-readable reason
    pub message: String,
}

/// Events sent by the relay to a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Channel confirmed
    Connected(Connected),
    /// Membership snapshot
    ExistingUsers(Vec<ParticipantAnnouncement>),
    /// A member joined
    UserJoined(ParticipantAnnouncement),
    /// A member left
    UserLeft(UserLeft),
    /// Negotiation envelope addressed to us
    Signal(SignalEnvelope),
    /// A member's flags changed
    StreamStateChanged(StreamStateChanged),
    /// A member's hand state changed
    HandRaisedChanged(HandRaisedChanged),
    /// Session metadata
    SessionInfo(SessionInfo),
    /// Moderation command addressed to us
    AdminCommand(AdminCommand),
    /// Whiteboard operation from another member
    WhiteboardDraw(WhiteboardBroadcast),
    /// Relay-side failure report
    Error(RelayError),
}

impl ServerMessage {
    /// Wire event name, used in logs.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::ExistingUsers(_) => "existing-users",
            Self::UserJoined(_) => "user-joined",
            Self::UserLeft(_) => "user-left",
            Self::Signal(_) => "signal",
            Self::StreamStateChanged(_) => "stream-state-changed",
            Self::HandRaisedChanged(_) => "hand-raised-changed",
            Self::SessionInfo(_) => "session-info",
            Self::AdminCommand(_) => "admin-command",
            Self::WhiteboardDraw(_) => "whiteboard-draw",
            Self::Error(_) => "error",
        }
    }
}
