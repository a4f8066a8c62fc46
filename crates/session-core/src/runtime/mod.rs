//! Session runtime: the single owner of all mutable session state.
//!
//! [`SessionRuntime::spawn`] starts the actor and returns a
//! [`SessionRuntimeHandle`]. Every command and every external event goes
//! through one queue, so state transitions never interleave.

pub mod messages;
mod session;

use common::types::{CourseId, MediaFlags, ParticipantId, Role, SessionId, UserId};
use signal_protocol::{AdminAction, WhiteboardOp};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::SessionError;
use crate::media::{FilePreferenceStore, MediaDevices, PreferenceStore, ScreenShareOutcome};
use crate::mesh::PeerConnectionFactory;
use crate::reconnect::BackoffPolicy;
use crate::recording::{FileSystemDelivery, HttpUploader, LocalDelivery, MediaEncoder, RecordingUploader};
use crate::signaling::{SignalingConnector, WebSocketConnector};
use crate::whiteboard::WhiteboardEvent;

pub use messages::{SessionMessage, SessionNotice, SessionSnapshot};
pub use session::SessionRuntime;

/// Inbound queue depth.
const SESSION_CHANNEL_BUFFER: usize = 500;

/// Notice fan-out depth; slow subscribers lag rather than block.
const NOTICE_CHANNEL_BUFFER: usize = 128;

/// Who the local participant is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProfile {
    pub user_id: Option<UserId>,
    pub name: String,
    pub role: Role,
}

/// Course the session belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseInfo {
    pub course_id: CourseId,
    pub course_name: Option<String>,
    pub category: Option<String>,
}

/// What to join and how
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub session_id: SessionId,
    pub profile: LocalProfile,
    /// Recordings of courseless sessions are only saved locally
    pub course: Option<CourseInfo>,
    pub backoff: BackoffPolicy,
}

impl SessionSetup {
    #[must_use]
    pub fn new(session_id: SessionId, profile: LocalProfile) -> Self {
        Self {
            session_id,
            profile,
            course: None,
            backoff: BackoffPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_course(mut self, course: CourseInfo) -> Self {
        self.course = Some(course);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Everything the runtime talks to outside itself.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn SignalingConnector>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub devices: Arc<dyn MediaDevices>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub encoder: Arc<dyn MediaEncoder>,
    pub uploader: Arc<dyn RecordingUploader>,
    pub local_delivery: Arc<dyn LocalDelivery>,
}

impl Collaborators {
    /// Wire the network and storage collaborators from configuration.
    ///
    /// The peer connection factory, capture devices and encoder belong to
    /// the media layer and are passed in.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if the upload client cannot be built.
    pub fn from_config(
        config: &Config,
        peers: Arc<dyn PeerConnectionFactory>,
        devices: Arc<dyn MediaDevices>,
        encoder: Arc<dyn MediaEncoder>,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            connector: Arc::new(WebSocketConnector::new(config.relay_url.clone())),
            peers,
            devices,
            preferences: Arc::new(FilePreferenceStore::new(config.preferences_path.clone())),
            encoder,
            uploader: Arc::new(HttpUploader::new(
                config.upload_url.clone(),
                config.upload_token.clone(),
            )?),
            local_delivery: Arc::new(FileSystemDelivery::new(config.recordings_dir.clone())),
        })
    }
}

/// Handle to a running [`SessionRuntime`].
#[derive(Clone, Debug)]
pub struct SessionRuntimeHandle {
    sender: mpsc::Sender<SessionMessage>,
    notices: broadcast::Sender<SessionNotice>,
    cancel_token: CancellationToken,
    session_id: SessionId,
}

impl SessionRuntimeHandle {
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Receive notices from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Flip the microphone and return the new local flags.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionClosed` once the session has ended.
    pub async fn toggle_audio(&self) -> Result<MediaFlags, SessionError> {
        self.request(|respond_to| SessionMessage::ToggleAudio { respond_to })
            .await?
    }

    /// Flip the outgoing video and return the new local flags.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionClosed` once the session has ended.
    pub async fn toggle_video(&self) -> Result<MediaFlags, SessionError> {
        self.request(|respond_to| SessionMessage::ToggleVideo { respond_to })
            .await?
    }

    /// Start or stop sharing the screen.
    ///
    /// # Errors
    ///
    /// Returns a device error when capture fails; local state is unchanged.
    pub async fn toggle_screen_share(&self) -> Result<ScreenShareOutcome, SessionError> {
        self.request(|respond_to| SessionMessage::ToggleScreenShare { respond_to })
            .await?
    }

    /// # Errors
    ///
    /// Returns `SessionError::SessionClosed` once the session has ended.
    pub async fn toggle_hand_raise(&self) -> Result<MediaFlags, SessionError> {
        self.request(|respond_to| SessionMessage::ToggleHandRaise { respond_to })
            .await?
    }

    /// Force the microphone off.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionClosed` once the session has ended.
    pub async fn mute_audio(&self) -> Result<MediaFlags, SessionError> {
        self.request(|respond_to| SessionMessage::MuteAudio { respond_to })
            .await?
    }

    /// # Errors
    ///
    /// Returns `SessionError::EncoderUnsupported` when recording is not
    /// possible on this device; the pipeline stays idle.
    pub async fn start_recording(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::StartRecording { respond_to })
            .await?
    }

    /// Stop recording. Delivery continues in the background and is
    /// reported through a notice.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Recording` when nothing was recording or
    /// nothing was captured.
    pub async fn stop_recording(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::StopRecording { respond_to })
            .await?
    }

    /// Broadcast a whiteboard operation.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Channel` while disconnected.
    pub async fn send_whiteboard(&self, op: WhiteboardOp) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::Whiteboard { op, respond_to })
            .await?
    }

    /// Moderate another member.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::PermissionDenied` unless the local role is
    /// tutor or admin.
    pub async fn admin_action(
        &self,
        action: AdminAction,
        target: ParticipantId,
    ) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::AdminAction {
            action,
            target,
            respond_to,
        })
        .await?
    }

    /// Report that a local capture track ended on its own.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionClosed` once the session has ended.
    pub async fn local_track_ended(&self, track_id: impl Into<String>) -> Result<(), SessionError> {
        self.sender
            .send(SessionMessage::LocalTrackEnded {
                track_id: track_id.into(),
            })
            .await
            .map_err(|_| SessionError::SessionClosed)
    }

    /// # Errors
    ///
    /// Returns `SessionError::SessionClosed` once the session has ended.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|respond_to| SessionMessage::Snapshot { respond_to })
            .await
    }

    /// Take the inbound whiteboard stream. Only the first caller gets it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionClosed` once the session has ended.
    pub async fn take_whiteboard_events(
        &self,
    ) -> Result<Option<mpsc::Receiver<WhiteboardEvent>>, SessionError> {
        self.request(|respond_to| SessionMessage::TakeWhiteboardEvents { respond_to })
            .await
    }

    /// Leave the session: stop tracks, close peer links, close the channel.
    ///
    /// Leaving an already closed session is not an error.
    pub async fn leave(&self) {
        let _ = self
            .request(|respond_to| SessionMessage::Leave { respond_to })
            .await;
    }

    /// Stop the runtime without waiting. Teardown still runs.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
