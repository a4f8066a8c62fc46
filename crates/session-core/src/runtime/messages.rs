//! Message types for the session runtime.
//!
//! Everything that can change session state arrives as a [`SessionMessage`]
//! on one queue: relay events, peer connection events, reconnection
//! progress and local commands alike.

use chrono::{DateTime, Utc};
use common::types::{MediaFlags, ParticipantId, SessionId};
use signal_protocol::{AdminAction, WhiteboardOp};
use tokio::sync::{mpsc, oneshot};

use crate::errors::SessionError;
use crate::media::ScreenShareOutcome;
use crate::mesh::{PeerEvent, PeerLinkView};
use crate::reconnect::{ConnectionState, ReconnectEvent};
use crate::recording::{DeliveryOutcome, RecordingStatus};
use crate::signaling::ChannelEvent;
use crate::store::Participant;
use crate::whiteboard::WhiteboardEvent;

/// Inbound queue of the session runtime.
#[derive(Debug)]
pub enum SessionMessage {
    /// Event from the signaling channel of the given generation.
    Channel { generation: u64, event: ChannelEvent },

    /// Event from a peer connection.
    Peer {
        remote_id: ParticipantId,
        link_epoch: u64,
        event: PeerEvent,
    },

    /// Progress from a retry cycle.
    Reconnect(ReconnectEvent),

    ToggleAudio {
        respond_to: oneshot::Sender<Result<MediaFlags, SessionError>>,
    },

    ToggleVideo {
        respond_to: oneshot::Sender<Result<MediaFlags, SessionError>>,
    },

    ToggleScreenShare {
        respond_to: oneshot::Sender<Result<ScreenShareOutcome, SessionError>>,
    },

    ToggleHandRaise {
        respond_to: oneshot::Sender<Result<MediaFlags, SessionError>>,
    },

    /// Force the microphone off.
    MuteAudio {
        respond_to: oneshot::Sender<Result<MediaFlags, SessionError>>,
    },

    StartRecording {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    StopRecording {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Broadcast a local whiteboard operation.
    Whiteboard {
        op: WhiteboardOp,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Moderate another member.
    AdminAction {
        action: AdminAction,
        target: ParticipantId,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// A local capture track ended outside our control.
    LocalTrackEnded { track_id: String },

    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    TakeWhiteboardEvents {
        respond_to: oneshot::Sender<Option<mpsc::Receiver<WhiteboardEvent>>>,
    },

    /// Leave the session and stop the runtime.
    Leave { respond_to: oneshot::Sender<()> },
}

/// Notable session events for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// First channel confirmed
    Connected { local_id: ParticipantId },
    ConnectionLost { reason: String },
    Reconnecting { attempt: u32 },
    Reconnected { local_id: ParticipantId, attempt: u32 },
    /// Retries exhausted; a manual restart is needed
    ReconnectFailed { attempts: u32 },
    ParticipantJoined { participant_id: ParticipantId, name: String },
    ParticipantLeft { participant_id: ParticipantId },
    /// A moderator turned our microphone off
    MutedByHost,
    /// A moderator asked us to unmute
    UnmuteRequested,
    /// A moderator removed us; the session has been left
    Kicked,
    /// The shared screen was closed from outside and camera video restored
    ScreenShareEnded,
    DeviceUnavailable { reason: String },
    RecordingStarted { mime_type: String },
    RecordingSaved(DeliveryOutcome),
    RecordingFailed { reason: String },
    RelayError { message: String },
    /// Teardown finished
    Left,
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    /// Current connection id, once a channel has been confirmed
    pub local_id: Option<ParticipantId>,
    pub connection_state: ConnectionState,
    pub local_flags: MediaFlags,
    /// Ordered by connection id
    pub participants: Vec<Participant>,
    /// Ordered by remote id
    pub peer_links: Vec<PeerLinkView>,
    pub started_at: Option<DateTime<Utc>>,
    pub recording_status: RecordingStatus,
}

impl SessionSnapshot {
    #[must_use]
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    #[must_use]
    pub fn peer_link(&self, id: &ParticipantId) -> Option<&PeerLinkView> {
        self.peer_links.iter().find(|l| &l.remote_id == id)
    }

    /// Time since the session started, as of `now`.
    #[must_use]
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at
            .map(|start| (now - start).max(chrono::Duration::zero()))
    }
}
