//! `SessionRuntime` actor.

use common::types::{MediaFlags, ParticipantId, SessionId};
use signal_protocol::{
    AdminAction, AdminActionRequest, AdminCommand, ClientMessage, HandRaisedChange, JoinSession,
    ParticipantAnnouncement, ServerMessage, SessionInfo, SessionRef, SignalEnvelope,
    SignalPayload, StartTime, StreamStateChange, WhiteboardOp,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::messages::{SessionMessage, SessionNotice, SessionSnapshot};
use super::{
    Collaborators, CourseInfo, LocalProfile, SessionRuntimeHandle, SessionSetup,
    NOTICE_CHANNEL_BUFFER, SESSION_CHANNEL_BUFFER,
};
use crate::errors::SessionError;
use crate::media::MediaStateController;
use crate::mesh::PeerMeshManager;
use crate::reconnect::{run_reconnect, ReconnectEvent, ReconnectOutcome, ReconnectionController};
use crate::recording::{deliver, LocalDelivery, RecordingPipeline, RecordingUploader};
use crate::signaling::{ChannelEvent, ChannelEventSink, ChannelHandle, SignalingConnector};
use crate::store::{Participant, SessionStateStore};
use crate::whiteboard::WhiteboardRelay;

/// The session actor.
pub struct SessionRuntime {
    session_id: SessionId,
    profile: LocalProfile,
    course: Option<CourseInfo>,
    receiver: mpsc::Receiver<SessionMessage>,
    /// Cloned into every channel, peer and retry task
    sender: mpsc::Sender<SessionMessage>,
    notices: broadcast::Sender<SessionNotice>,
    cancel_token: CancellationToken,
    connector: Arc<dyn SignalingConnector>,
    uploader: Arc<dyn RecordingUploader>,
    local_delivery: Arc<dyn LocalDelivery>,
    channel: Option<ChannelHandle>,
    local_id: Option<ParticipantId>,
    mesh: PeerMeshManager,
    store: SessionStateStore,
    reconnect: ReconnectionController,
    media: MediaStateController,
    recording: RecordingPipeline,
    whiteboard: WhiteboardRelay,
    left: bool,
}

impl SessionRuntime {
    /// Spawn the runtime. It acquires local media and connects on its own.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        setup: SessionSetup,
        collaborators: Collaborators,
    ) -> (SessionRuntimeHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let course_id = setup.course.as_ref().map(|c| c.course_id.clone());
        let runtime = Self {
            session_id: setup.session_id.clone(),
            profile: setup.profile,
            course: setup.course,
            receiver,
            sender: sender.clone(),
            notices: notices.clone(),
            cancel_token: cancel_token.clone(),
            connector: collaborators.connector,
            uploader: collaborators.uploader,
            local_delivery: collaborators.local_delivery,
            channel: None,
            local_id: None,
            mesh: PeerMeshManager::new(collaborators.peers, sender.clone()),
            store: SessionStateStore::new(),
            reconnect: ReconnectionController::new(setup.backoff),
            media: MediaStateController::new(
                Arc::clone(&collaborators.devices),
                collaborators.preferences,
            ),
            recording: RecordingPipeline::new(collaborators.devices, collaborators.encoder, course_id),
            whiteboard: WhiteboardRelay::new(setup.session_id.clone()),
            left: false,
        };

        let task_handle = tokio::spawn(runtime.run());

        let handle = SessionRuntimeHandle {
            sender,
            notices,
            cancel_token,
            session_id: setup.session_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "ls.runtime", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "ls.runtime",
            session_id = %self.session_id,
            role = %self.profile.role,
            "Session runtime started"
        );

        self.start().await;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "ls.runtime", "Session runtime received cancellation signal");
                    self.teardown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        break;
                    };
                    if self.handle_message(message).await.is_break() {
                        break;
                    }
                }
            }
        }

        info!(
            target: "ls.runtime",
            session_id = %self.session_id,
            "Session runtime stopped"
        );
    }

    /// Acquire local media, then open the first channel.
    async fn start(&mut self) {
        if let Err(e) = self.media.initialize().await {
            self.notify(SessionNotice::DeviceUnavailable {
                reason: e.user_message(),
            });
        }

        let generation = self.reconnect.allocate_generation();
        let sink = ChannelEventSink::new(generation, self.sender.clone());
        let timeout = self.reconnect.policy().connect_timeout;

        let connected = tokio::select! {
            () = self.cancel_token.cancelled() => return,
            result = tokio::time::timeout(timeout, self.connector.connect(&self.session_id, sink)) => result,
        };

        match connected {
            Ok(Ok(handle)) => self.channel_established(handle, None).await,
            Ok(Err(e)) => {
                warn!(target: "ls.runtime", error = %e, "Initial connection failed");
                self.channel_lost(e.to_string());
            }
            Err(_) => {
                warn!(
                    target: "ls.runtime",
                    timeout_ms = timeout.as_millis(),
                    "Initial connection not confirmed in time"
                );
                self.channel_lost(SessionError::ConnectTimeout(timeout).to_string());
            }
        }
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: SessionMessage) -> ControlFlow<()> {
        match message {
            SessionMessage::Channel { generation, event } => {
                if self.channel.as_ref().map(ChannelHandle::generation) != Some(generation) {
                    debug!(
                        target: "ls.runtime",
                        generation,
                        "Event from a replaced channel, ignoring"
                    );
                    return ControlFlow::Continue(());
                }
                match event {
                    ChannelEvent::Message(message) => return self.handle_server_message(message).await,
                    ChannelEvent::Disconnected { reason } => {
                        warn!(target: "ls.runtime", reason = %reason, "Signaling channel lost");
                        self.channel = None;
                        self.channel_lost(reason);
                    }
                }
            }

            SessionMessage::Peer {
                remote_id,
                link_epoch,
                event,
            } => {
                if let Some(payload) = self.mesh.handle_peer_event(&remote_id, link_epoch, event).await {
                    self.send_signal(remote_id, payload).await;
                }
            }

            SessionMessage::Reconnect(event) => self.handle_reconnect_event(event).await,

            SessionMessage::ToggleAudio { respond_to } => {
                if self.media.toggle_audio().await {
                    self.broadcast_flags().await;
                }
                let _ = respond_to.send(Ok(self.media.flags()));
            }

            SessionMessage::ToggleVideo { respond_to } => {
                if self.media.toggle_video().await {
                    self.broadcast_flags().await;
                }
                let _ = respond_to.send(Ok(self.media.flags()));
            }

            SessionMessage::ToggleScreenShare { respond_to } => {
                let result = self.media.toggle_screen_share(&self.mesh).await;
                if matches!(&result, Ok(outcome) if outcome.changed) {
                    self.broadcast_flags().await;
                }
                let _ = respond_to.send(result);
            }

            SessionMessage::ToggleHandRaise { respond_to } => {
                let raised = self.media.toggle_hand_raise();
                self.send(ClientMessage::HandRaisedChange(HandRaisedChange {
                    session_id: self.session_id.clone(),
                    is_hand_raised: raised,
                }))
                .await;
                let _ = respond_to.send(Ok(self.media.flags()));
            }

            SessionMessage::MuteAudio { respond_to } => {
                if self.media.mute_audio().await {
                    self.broadcast_flags().await;
                }
                let _ = respond_to.send(Ok(self.media.flags()));
            }

            SessionMessage::StartRecording { respond_to } => {
                let result = self.start_recording().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StopRecording { respond_to } => {
                let result = self.finish_recording().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Whiteboard { op, respond_to } => {
                let result = self.send_whiteboard(op).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::AdminAction {
                action,
                target,
                respond_to,
            } => {
                let result = self.admin_action(action, target).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::LocalTrackEnded { track_id } => self.local_track_ended(&track_id).await,

            SessionMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            SessionMessage::TakeWhiteboardEvents { respond_to } => {
                let _ = respond_to.send(self.whiteboard.take_events());
            }

            SessionMessage::Leave { respond_to } => {
                self.teardown().await;
                let _ = respond_to.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_server_message(&mut self, message: ServerMessage) -> ControlFlow<()> {
        match message {
            ServerMessage::Connected(_) => {
                debug!(target: "ls.runtime", "Duplicate channel confirmation, ignoring");
            }

            ServerMessage::ExistingUsers(members) => {
                debug!(target: "ls.runtime", count = members.len(), "Membership snapshot received");
                for member in members {
                    self.member_announced(member, false).await;
                }
            }

            ServerMessage::UserJoined(member) => self.member_announced(member, true).await,

            ServerMessage::UserLeft(left) => {
                let had_link = self.mesh.remove(&left.participant_id).await;
                let had_entry = self.store.remove(&left.participant_id).is_some();
                if had_link || had_entry {
                    info!(
                        target: "ls.runtime",
                        participant_id = %left.participant_id,
                        "Participant left"
                    );
                    self.notify(SessionNotice::ParticipantLeft {
                        participant_id: left.participant_id,
                    });
                }
            }

            ServerMessage::Signal(envelope) => self.handle_signal(envelope).await,

            ServerMessage::StreamStateChanged(changed) => {
                self.store
                    .apply_stream_state(&changed.participant_id, changed.flags);
                self.mesh
                    .update_remote_flags(&changed.participant_id, changed.flags);
            }

            ServerMessage::HandRaisedChanged(changed) => {
                self.store
                    .set_hand_raised(&changed.participant_id, changed.is_hand_raised);
            }

            ServerMessage::SessionInfo(SessionInfo { start_time }) => {
                match start_time.as_ref().and_then(StartTime::to_datetime) {
                    Some(started_at) => self.store.set_started_at(started_at),
                    None => warn!(target: "ls.runtime", ?start_time, "Unusable session start time"),
                }
            }

            ServerMessage::AdminCommand(command) => return self.handle_admin_command(command).await,

            ServerMessage::WhiteboardDraw(broadcast) => {
                self.whiteboard.inbound(self.local_id.as_ref(), broadcast);
            }

            ServerMessage::Error(relay_error) => {
                warn!(target: "ls.runtime", message = %relay_error.message, "Relay reported an error");
                self.notify(SessionNotice::RelayError {
                    message: relay_error.message,
                });
            }
        }
        ControlFlow::Continue(())
    }

    /// Add a member to the view and apply the initiator tie-break.
    async fn member_announced(&mut self, member: ParticipantAnnouncement, notify: bool) {
        let Some(local_id) = self.local_id.clone() else {
            return;
        };
        if member.participant_id == local_id {
            return;
        }

        let participant = Participant::from(member);
        let remote_id = participant.id.clone();
        let name = participant.name.clone();
        let flags = participant.flags;
        let added = self.store.insert_if_absent(participant);

        let outcome = self
            .mesh
            .discover(&local_id, &remote_id, flags, self.media.local_stream().cloned())
            .await;
        debug!(
            target: "ls.runtime",
            participant_id = %remote_id,
            ?outcome,
            "Participant discovered"
        );

        if added && notify {
            self.notify(SessionNotice::ParticipantJoined {
                participant_id: remote_id,
                name,
            });
        }
    }

    async fn handle_signal(&mut self, envelope: SignalEnvelope) {
        let Some(local_id) = self.local_id.as_ref() else {
            return;
        };
        if &envelope.to != local_id || &envelope.from == local_id {
            debug!(
                target: "ls.runtime",
                to = %envelope.to,
                from = %envelope.from,
                "Signal not addressed to us, ignoring"
            );
            return;
        }

        self.store.insert_if_absent(Participant {
            id: envelope.from.clone(),
            name: envelope.name.clone(),
            role: envelope.role,
            user_id: None,
            flags: envelope.flags,
        });
        self.store
            .update_identity(&envelope.from, &envelope.name, envelope.role);
        self.store.apply_stream_state(&envelope.from, envelope.flags);

        let outcome = self
            .mesh
            .handle_signal(&envelope, self.media.local_stream().cloned())
            .await;
        debug!(
            target: "ls.runtime",
            from = %envelope.from,
            kind = envelope.kind().as_str(),
            ?outcome,
            "Signal handled"
        );
    }

    async fn handle_admin_command(&mut self, command: AdminCommand) -> ControlFlow<()> {
        if let Some(target_id) = &command.target_id {
            if self.local_id.as_ref() != Some(target_id) {
                debug!(
                    target: "ls.runtime",
                    action = command.action.as_str(),
                    target_id = %target_id,
                    "Moderation command for another participant, ignoring"
                );
                return ControlFlow::Continue(());
            }
        }
        info!(
            target: "ls.runtime",
            action = command.action.as_str(),
            from = ?command.from,
            "Moderation command received"
        );
        match command.action {
            AdminAction::Mute => {
                if self.media.mute_audio().await {
                    self.broadcast_flags().await;
                }
                self.notify(SessionNotice::MutedByHost);
            }
            AdminAction::RequestUnmute => self.notify(SessionNotice::UnmuteRequested),
            AdminAction::Kick => {
                self.notify(SessionNotice::Kicked);
                self.teardown().await;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_reconnect_event(&mut self, event: ReconnectEvent) {
        match event {
            ReconnectEvent::Attempt { attempt, delay } => {
                info!(
                    target: "ls.runtime",
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Reconnecting"
                );
                self.notify(SessionNotice::Reconnecting { attempt });
            }
            ReconnectEvent::Connecting { attempt } => {
                debug!(target: "ls.runtime", attempt, "Reconnection attempt started");
                self.reconnect.on_attempt();
            }
            ReconnectEvent::Finished(ReconnectOutcome::Connected { handle, attempt }) => {
                if self.left {
                    handle.disconnect();
                    return;
                }
                self.channel_established(handle, Some(attempt)).await;
            }
            ReconnectEvent::Finished(ReconnectOutcome::Exhausted { attempts }) => {
                self.reconnect.on_exhausted();
                error!(
                    target: "ls.runtime",
                    attempts,
                    "Reconnection abandoned, manual restart needed"
                );
                self.notify(SessionNotice::ReconnectFailed { attempts });
            }
        }
    }

    /// Adopt a confirmed channel: join with the current flags, drop every
    /// stale link and ask for the membership snapshot.
    async fn channel_established(&mut self, handle: ChannelHandle, attempt: Option<u32>) {
        let local_id = handle.connection_id().clone();
        info!(
            target: "ls.runtime",
            local_id = %local_id,
            generation = handle.generation(),
            "Signaling channel established"
        );
        self.local_id = Some(local_id.clone());
        self.channel = Some(handle);
        self.reconnect.on_connected();

        self.send(ClientMessage::JoinSession(self.join_message())).await;

        self.mesh.clear().await;
        self.store.clear();

        self.send(ClientMessage::GetSessionUsers(SessionRef {
            session_id: self.session_id.clone(),
        }))
        .await;

        match attempt {
            Some(attempt) => self.notify(SessionNotice::Reconnected { local_id, attempt }),
            None => self.notify(SessionNotice::Connected { local_id }),
        }
    }

    fn channel_lost(&mut self, reason: String) {
        self.notify(SessionNotice::ConnectionLost { reason });
        if self.left {
            return;
        }
        match self.reconnect.begin() {
            Some(plan) => {
                tokio::spawn(run_reconnect(
                    Arc::clone(&self.connector),
                    self.session_id.clone(),
                    *self.reconnect.policy(),
                    plan.first_generation,
                    self.sender.clone(),
                    plan.cancel_token,
                ));
            }
            None => debug!(
                target: "ls.runtime",
                exhausted = self.reconnect.is_exhausted(),
                "Reconnection not started"
            ),
        }
    }

    fn join_message(&self) -> JoinSession {
        JoinSession {
            session_id: self.session_id.clone(),
            user_id: self.profile.user_id.clone(),
            user_role: self.profile.role,
            user_name: self.profile.name.clone(),
            course_id: self.course.as_ref().map(|c| c.course_id.clone()),
            course_name: self.course.as_ref().and_then(|c| c.course_name.clone()),
            category: self.course.as_ref().and_then(|c| c.category.clone()),
            flags: self.media.flags(),
        }
    }

    async fn start_recording(&mut self) -> Result<(), SessionError> {
        let flags = self.media.flags();
        match self
            .recording
            .start(self.media.local_stream(), flags.screen_sharing)
            .await
        {
            Ok(mime_type) => {
                self.media.set_recording(true);
                self.broadcast_flags().await;
                self.notify(SessionNotice::RecordingStarted {
                    mime_type: mime_type.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.notify(SessionNotice::RecordingFailed {
                    reason: e.user_message(),
                });
                Err(e)
            }
        }
    }

    /// Stop recording and deliver the result in the background.
    async fn finish_recording(&mut self) -> Result<(), SessionError> {
        let stopped = self.recording.stop().await;
        if self.media.flags().recording {
            self.media.set_recording(false);
            self.broadcast_flags().await;
        }

        let artifact = match stopped {
            Ok(artifact) => artifact,
            Err(e) => {
                self.notify(SessionNotice::RecordingFailed {
                    reason: e.user_message(),
                });
                return Err(e);
            }
        };

        let uploader = Arc::clone(&self.uploader);
        let local_delivery = Arc::clone(&self.local_delivery);
        let notices = self.notices.clone();
        tokio::spawn(async move {
            let notice = match deliver(&artifact, uploader.as_ref(), local_delivery.as_ref()).await {
                Ok(outcome) => SessionNotice::RecordingSaved(outcome),
                Err(e) => SessionNotice::RecordingFailed {
                    reason: e.user_message(),
                },
            };
            let _ = notices.send(notice);
        });
        Ok(())
    }

    async fn send_whiteboard(&mut self, op: WhiteboardOp) -> Result<(), SessionError> {
        let message = self.whiteboard.outbound(op);
        self.send_checked(message).await
    }

    async fn admin_action(
        &mut self,
        action: AdminAction,
        target: ParticipantId,
    ) -> Result<(), SessionError> {
        if !self.profile.role.can_moderate() {
            warn!(
                target: "ls.runtime",
                role = %self.profile.role,
                action = action.as_str(),
                "Moderation refused for role"
            );
            return Err(SessionError::PermissionDenied(format!(
                "a {} cannot {} other participants",
                self.profile.role,
                action.as_str()
            )));
        }
        self.send_checked(ClientMessage::AdminAction(AdminActionRequest {
            session_id: self.session_id.clone(),
            action,
            target_id: target,
        }))
        .await
    }

    async fn local_track_ended(&mut self, track_id: &str) {
        if self.media.screen_track_id() != Some(track_id) {
            debug!(target: "ls.runtime", track_id, "Untracked local track ended");
            return;
        }
        info!(target: "ls.runtime", "Shared screen closed, restoring camera");
        match self.media.toggle_screen_share(&self.mesh).await {
            Ok(outcome) if outcome.changed => {
                self.broadcast_flags().await;
                self.notify(SessionNotice::ScreenShareEnded);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "ls.runtime", error = %e, "Could not restore camera after screen share");
                self.notify(SessionNotice::DeviceUnavailable {
                    reason: e.user_message(),
                });
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            local_id: self.local_id.clone(),
            connection_state: self.reconnect.state(),
            local_flags: self.media.flags(),
            participants: self.store.participants().cloned().collect(),
            peer_links: self.mesh.views(),
            started_at: self.store.started_at(),
            recording_status: self.recording.status(),
        }
    }

    /// Stop local tracks, destroy every link, then close the channel.
    async fn teardown(&mut self) {
        if self.left {
            return;
        }
        self.left = true;
        self.reconnect.shutdown();

        if self.recording.is_recording() {
            if let Err(e) = self.finish_recording().await {
                warn!(target: "ls.runtime", error = %e, "Recording lost during teardown");
            }
        }

        self.media.stop_all();
        let links = self.mesh.clear().await;

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel
                .send(ClientMessage::LeaveSession(SessionRef {
                    session_id: self.session_id.clone(),
                }))
                .await
            {
                debug!(target: "ls.runtime", error = %e, "Could not announce departure");
            }
            channel.disconnect();
        }

        info!(target: "ls.runtime", links, "Left session");
        self.notify(SessionNotice::Left);
    }

    async fn broadcast_flags(&self) {
        self.send(ClientMessage::StreamStateChange(StreamStateChange {
            session_id: self.session_id.clone(),
            flags: self.media.flags(),
        }))
        .await;
    }

    /// Wrap a connection's negotiation output with our identity and flags.
    async fn send_signal(&self, remote_id: ParticipantId, signal: SignalPayload) {
        let Some(local_id) = self.local_id.clone() else {
            return;
        };
        self.send(ClientMessage::Signal(SignalEnvelope {
            to: remote_id,
            from: local_id,
            signal,
            role: self.profile.role,
            name: self.profile.name.clone(),
            flags: self.local_flags(),
        }))
        .await;
    }

    fn local_flags(&self) -> MediaFlags {
        self.media.flags()
    }

    /// Send, logging failures.
    async fn send(&self, message: ClientMessage) {
        if let Err(e) = self.send_checked(message).await {
            debug!(target: "ls.runtime", error = %e, "Event not sent");
        }
    }

    async fn send_checked(&self, message: ClientMessage) -> Result<(), SessionError> {
        let Some(channel) = &self.channel else {
            return Err(SessionError::Channel(format!(
                "not connected, dropping {}",
                message.event_name()
            )));
        };
        channel.send(message).await
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }
}

impl std::fmt::Debug for SessionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRuntime")
            .field("session_id", &self.session_id)
            .field("local_id", &self.local_id)
            .field("links", &self.mesh.len())
            .field("participants", &self.store.len())
            .field("left", &self.left)
            .finish_non_exhaustive()
    }
}

