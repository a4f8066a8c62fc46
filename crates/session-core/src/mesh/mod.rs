//! Peer mesh: one direct connection per remote participant.
//!
//! Who opens a connection is decided by [`should_initiate`], so a pair of
//! participants that discover each other at the same time still produces
//! exactly one offer.

pub mod manager;

use async_trait::async_trait;
use common::types::{MediaFlags, ParticipantId};
use signal_protocol::SignalPayload;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::errors::SessionError;
use crate::media::{MediaStream, MediaTrack};
use crate::runtime::messages::SessionMessage;

pub use manager::{DiscoveryOutcome, PeerMeshManager, SignalOutcome, TrackReplacement};

/// Initiator tie-break: the side with the lexicographically greater
/// connection id sends the offer.
#[must_use]
pub fn should_initiate(local: &ParticipantId, remote: &ParticipantId) -> bool {
    local > remote
}

/// Which side of the offer/answer exchange a connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Creates the offer
    Initiator,
    /// Answers an incoming offer
    Responder,
}

/// Something a peer connection reports back to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Negotiation output to relay to the remote side
    Signal(SignalPayload),
    /// Media path established
    Connected,
    /// Remote media arrived
    RemoteStream { stream_id: String },
    /// Connection failed
    Error(String),
    /// Connection closed by the remote side or the transport
    Closed,
}

/// Routes a connection's events into the session's inbound queue.
///
/// Each link gets its own epoch; events carrying an epoch that no longer
/// matches the tracked link are dropped.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    remote_id: ParticipantId,
    link_epoch: u64,
    tx: mpsc::Sender<SessionMessage>,
}

impl PeerEventSink {
    #[must_use]
    pub fn new(remote_id: ParticipantId, link_epoch: u64, tx: mpsc::Sender<SessionMessage>) -> Self {
        Self {
            remote_id,
            link_epoch,
            tx,
        }
    }

    #[must_use]
    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    /// Deliver an event. Returns `false` once the session is gone.
    pub async fn emit(&self, event: PeerEvent) -> bool {
        self.tx
            .send(SessionMessage::Peer {
                remote_id: self.remote_id.clone(),
                link_epoch: self.link_epoch,
                event,
            })
            .await
            .is_ok()
    }
}

/// One direct media connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Feed a negotiation payload received from the remote side.
    async fn signal(&self, payload: SignalPayload) -> Result<(), SessionError>;

    /// Swap the outgoing video track in place, without renegotiating.
    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<(), SessionError>;

    /// Release the connection. Safe to call more than once.
    async fn close(&self);
}

/// Creates peer connections.
///
/// An `Initiator` connection must emit its offer through `events` on its own;
/// a `Responder` waits for [`PeerConnection::signal`].
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        remote_id: &ParticipantId,
        role: NegotiationRole,
        local_stream: Option<MediaStream>,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>, SessionError>;
}

/// Lifecycle of a [`PeerLink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkStatus {
    /// Negotiating, or waiting for the remote offer
    Pending,
    /// Media path up
    Connected,
    /// Failed or closed; a new inbound offer may revive it
    Closed,
}

/// The local end of one remote participant's connection.
pub struct PeerLink {
    pub(crate) remote_id: ParticipantId,
    pub(crate) connection: Option<Box<dyn PeerConnection>>,
    pub(crate) role: Option<NegotiationRole>,
    pub(crate) remote_flags: MediaFlags,
    pub(crate) status: PeerLinkStatus,
    pub(crate) epoch: u64,
    pub(crate) has_remote_stream: bool,
}

impl PeerLink {
    #[must_use]
    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    #[must_use]
    pub fn status(&self) -> PeerLinkStatus {
        self.status
    }

    /// `false` for a placeholder still waiting for the remote offer.
    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    #[must_use]
    pub fn remote_flags(&self) -> MediaFlags {
        self.remote_flags
    }

    #[must_use]
    pub fn view(&self) -> PeerLinkView {
        PeerLinkView {
            remote_id: self.remote_id.clone(),
            status: self.status,
            role: self.role,
            has_connection: self.connection.is_some(),
            has_remote_stream: self.has_remote_stream,
            remote_flags: self.remote_flags,
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("remote_id", &self.remote_id)
            .field("role", &self.role)
            .field("status", &self.status)
            .field("epoch", &self.epoch)
            .field("has_connection", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

/// Read-only copy of a link for snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLinkView {
    pub remote_id: ParticipantId,
    pub status: PeerLinkStatus,
    /// `None` for a placeholder
    pub role: Option<NegotiationRole>,
    pub has_connection: bool,
    pub has_remote_stream: bool,
    pub remote_flags: MediaFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    #[test]
    fn test_greater_id_initiates() {
        assert!(should_initiate(&id("b2"), &id("a1")));
        assert!(!should_initiate(&id("a1"), &id("b2")));
    }

    #[test]
    fn test_exactly_one_side_initiates() {
        let ids = ["a1", "b2", "B2", "a10", "a9", "zz", "z", "socket-Xy3", "socket-xY3"];
        for a in ids {
            for b in ids {
                if a == b {
                    continue;
                }
                let forward = should_initiate(&id(a), &id(b));
                let backward = should_initiate(&id(b), &id(a));
                assert!(forward ^ backward, "pair ({a}, {b}) must have one initiator");
            }
        }
    }

    #[test]
    fn test_same_id_never_initiates() {
        assert!(!should_initiate(&id("a1"), &id("a1")));
    }

    #[test]
    fn test_comparison_is_bytewise_not_numeric() {
        assert!(should_initiate(&id("a9"), &id("a10")));
        assert!(should_initiate(&id("a"), &id("Z")));
    }
}
