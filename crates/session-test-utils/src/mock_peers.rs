//! Scripted peer connections.
//!
//! An initiator emits an offer as soon as it is created. A responder
//! answers the first offer it is fed and reports itself connected; an
//! initiator reports connected once it is fed an answer. Every call is
//! logged so tests can check who negotiated with whom.

use async_trait::async_trait;
use common::types::ParticipantId;
use session_core::errors::SessionError;
use session_core::media::{MediaStream, MediaTrack};
use session_core::mesh::{NegotiationRole, PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventSink};
use signal_protocol::{SignalKind, SignalPayload};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// What the mock connections did.
#[derive(Debug, Default)]
pub struct PeerLog {
    created: Mutex<Vec<(ParticipantId, NegotiationRole)>>,
    signals: Mutex<Vec<(ParticipantId, SignalKind)>>,
    replaced: Mutex<Vec<(ParticipantId, String)>>,
    closed: Mutex<Vec<ParticipantId>>,
}

impl PeerLog {
    /// Connections created, in order.
    #[must_use]
    pub fn created(&self) -> Vec<(ParticipantId, NegotiationRole)> {
        self.created.lock().unwrap().clone()
    }

    /// Roles used for one remote, in creation order.
    #[must_use]
    pub fn roles_for(&self, remote_id: &ParticipantId) -> Vec<NegotiationRole> {
        self.created()
            .into_iter()
            .filter(|(id, _)| id == remote_id)
            .map(|(_, role)| role)
            .collect()
    }

    /// Payload kinds fed into connections.
    #[must_use]
    pub fn signals(&self) -> Vec<(ParticipantId, SignalKind)> {
        self.signals.lock().unwrap().clone()
    }

    /// Successful video track swaps as `(remote, track id)`.
    #[must_use]
    pub fn replaced(&self) -> Vec<(ParticipantId, String)> {
        self.replaced.lock().unwrap().clone()
    }

    /// Connections closed, in order.
    #[must_use]
    pub fn closed(&self) -> Vec<ParticipantId> {
        self.closed.lock().unwrap().clone()
    }
}

/// Factory for [`MockPeerConnection`]s.
#[derive(Debug, Default)]
pub struct MockPeerFactory {
    log: Arc<PeerLog>,
    fail_create: Mutex<HashSet<ParticipantId>>,
    fail_replace: Mutex<HashSet<ParticipantId>>,
}

impl MockPeerFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn log(&self) -> Arc<PeerLog> {
        Arc::clone(&self.log)
    }

    /// Creating a connection to `remote_id` fails.
    pub fn fail_create_for(&self, remote_id: &str) {
        self.fail_create
            .lock()
            .unwrap()
            .insert(ParticipantId::new(remote_id));
    }

    /// Swapping the video track on the connection to `remote_id` fails.
    pub fn fail_replace_for(&self, remote_id: &str) {
        self.fail_replace
            .lock()
            .unwrap()
            .insert(ParticipantId::new(remote_id));
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(
        &self,
        remote_id: &ParticipantId,
        role: NegotiationRole,
        _local_stream: Option<MediaStream>,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>, SessionError> {
        if self.fail_create.lock().unwrap().contains(remote_id) {
            return Err(SessionError::Negotiation {
                participant_id: remote_id.clone(),
                reason: "mock refused to create a connection".to_string(),
            });
        }
        self.log
            .created
            .lock()
            .unwrap()
            .push((remote_id.clone(), role));

        if role == NegotiationRole::Initiator {
            emit_later(
                events.clone(),
                vec![PeerEvent::Signal(SignalPayload::Offer {
                    sdp: format!("offer-to-{remote_id}"),
                })],
            );
        }

        Ok(Box::new(MockPeerConnection {
            remote_id: remote_id.clone(),
            role,
            events,
            log: Arc::clone(&self.log),
            fail_replace: self.fail_replace.lock().unwrap().contains(remote_id),
        }))
    }
}

/// Scripted peer connection.
pub struct MockPeerConnection {
    remote_id: ParticipantId,
    role: NegotiationRole,
    events: PeerEventSink,
    log: Arc<PeerLog>,
    fail_replace: bool,
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn signal(&self, payload: SignalPayload) -> Result<(), SessionError> {
        self.log
            .signals
            .lock()
            .unwrap()
            .push((self.remote_id.clone(), payload.kind()));

        match (self.role, &payload) {
            (NegotiationRole::Responder, SignalPayload::Offer { .. }) => emit_later(
                self.events.clone(),
                vec![
                    PeerEvent::Signal(SignalPayload::Answer {
                        sdp: format!("answer-to-{}", self.remote_id),
                    }),
                    PeerEvent::Connected,
                ],
            ),
            (NegotiationRole::Initiator, SignalPayload::Answer { .. }) => {
                emit_later(self.events.clone(), vec![PeerEvent::Connected]);
            }
            _ => {}
        }
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<(), SessionError> {
        if self.fail_replace {
            return Err(SessionError::TrackReplacement {
                participant_id: self.remote_id.clone(),
                reason: "mock sender gone".to_string(),
            });
        }
        self.log
            .replaced
            .lock()
            .unwrap()
            .push((self.remote_id.clone(), track.id().to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.log.closed.lock().unwrap().push(self.remote_id.clone());
    }
}

/// Emit from a separate task so the session queue is never awaited from
/// inside the session's own handler.
fn emit_later(events: PeerEventSink, batch: Vec<PeerEvent>) {
    tokio::spawn(async move {
        for event in batch {
            if !events.emit(event).await {
                break;
            }
        }
    });
}
