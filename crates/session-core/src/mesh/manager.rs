//! Peer mesh manager.
//!
//! Owns every [`PeerLink`] and is the only code that touches a connection
//! object. The participant store only ever sees flags and metadata.

use common::types::{MediaFlags, ParticipantId};
use futures_util::future::join_all;
use signal_protocol::{SignalEnvelope, SignalKind, SignalPayload};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    should_initiate, NegotiationRole, PeerConnectionFactory, PeerEvent, PeerEventSink, PeerLink,
    PeerLinkStatus, PeerLinkView,
};
use crate::errors::SessionError;
use crate::media::{MediaStream, MediaTrack};
use crate::observability::metrics;
use crate::runtime::messages::SessionMessage;

/// Result of learning about a remote participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Link already exists, nothing done
    AlreadyTracked,
    /// Announcement named the local participant
    SelfAnnouncement,
    /// Local side initiated; offer will follow from the connection
    Initiated,
    /// Placeholder created; the remote side will send the offer
    AwaitingOffer,
    /// Connection could not be created; link is tracked as closed
    Failed,
}

/// Result of handling an inbound negotiation envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Fed into the existing connection
    Delivered,
    /// Offer from a sender without a live connection; responder created
    Answered,
    /// No connection to feed and not an offer
    Dropped,
    /// Connection rejected the payload or could not be created
    Failed,
}

/// Outcome of swapping the video track on one link
#[derive(Debug)]
pub struct TrackReplacement {
    pub remote_id: ParticipantId,
    pub result: Result<(), SessionError>,
}

/// Maintains exactly one [`PeerLink`] per remote participant.
pub struct PeerMeshManager {
    factory: Arc<dyn PeerConnectionFactory>,
    events_tx: mpsc::Sender<SessionMessage>,
    links: HashMap<ParticipantId, PeerLink>,
    next_epoch: u64,
}

impl PeerMeshManager {
    pub fn new(factory: Arc<dyn PeerConnectionFactory>, events_tx: mpsc::Sender<SessionMessage>) -> Self {
        Self {
            factory,
            events_tx,
            links: HashMap::new(),
            next_epoch: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    #[must_use]
    pub fn contains(&self, remote_id: &ParticipantId) -> bool {
        self.links.contains_key(remote_id)
    }

    #[must_use]
    pub fn get(&self, remote_id: &ParticipantId) -> Option<&PeerLink> {
        self.links.get(remote_id)
    }

    /// Views of every link, ordered by remote id.
    #[must_use]
    pub fn views(&self) -> Vec<PeerLinkView> {
        let mut views: Vec<_> = self.links.values().map(PeerLink::view).collect();
        views.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        views
    }

    fn allocate_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    fn sink(&self, remote_id: &ParticipantId, epoch: u64) -> PeerEventSink {
        PeerEventSink::new(remote_id.clone(), epoch, self.events_tx.clone())
    }

    /// Apply the tie-break to a newly announced participant.
    ///
    /// Used for both the membership snapshot and single join events; a
    /// repeated announcement for a tracked participant is a no-op.
    pub async fn discover(
        &mut self,
        local_id: &ParticipantId,
        remote_id: &ParticipantId,
        remote_flags: MediaFlags,
        local_stream: Option<MediaStream>,
    ) -> DiscoveryOutcome {
        if remote_id == local_id {
            return DiscoveryOutcome::SelfAnnouncement;
        }
        if self.links.contains_key(remote_id) {
            debug!(
                target: "ls.mesh",
                remote_id = %remote_id,
                "Participant already tracked, ignoring announcement"
            );
            return DiscoveryOutcome::AlreadyTracked;
        }

        let epoch = self.allocate_epoch();
        let mut link = PeerLink {
            remote_id: remote_id.clone(),
            connection: None,
            role: None,
            remote_flags,
            status: PeerLinkStatus::Pending,
            epoch,
            has_remote_stream: false,
        };

        let outcome = if should_initiate(local_id, remote_id) {
            let sink = self.sink(remote_id, epoch);
            match self
                .factory
                .create(remote_id, NegotiationRole::Initiator, local_stream, sink)
                .await
            {
                Ok(connection) => {
                    info!(
                        target: "ls.mesh",
                        remote_id = %remote_id,
                        "Initiating peer connection"
                    );
                    link.connection = Some(connection);
                    link.role = Some(NegotiationRole::Initiator);
                    DiscoveryOutcome::Initiated
                }
                Err(e) => {
                    warn!(
                        target: "ls.mesh",
                        remote_id = %remote_id,
                        error = %e,
                        "Failed to create initiating connection"
                    );
                    link.status = PeerLinkStatus::Closed;
                    DiscoveryOutcome::Failed
                }
            }
        } else {
            debug!(
                target: "ls.mesh",
                remote_id = %remote_id,
                "Remote side initiates, waiting for offer"
            );
            DiscoveryOutcome::AwaitingOffer
        };

        self.links.insert(remote_id.clone(), link);
        metrics::set_peer_links_active(self.links.len());
        outcome
    }

    /// Route an inbound envelope to its link.
    ///
    /// A live connection is never recreated. An offer from a sender with no
    /// live connection (untracked, placeholder or closed) always gets a fresh
    /// responder, whatever the tie-break says.
    pub async fn handle_signal(
        &mut self,
        envelope: &SignalEnvelope,
        local_stream: Option<MediaStream>,
    ) -> SignalOutcome {
        let remote_id = &envelope.from;

        if let Some(link) = self.links.get_mut(remote_id) {
            link.remote_flags = envelope.flags;
            if link.status != PeerLinkStatus::Closed {
                if let Some(connection) = &link.connection {
                    return match connection.signal(envelope.signal.clone()).await {
                        Ok(()) => SignalOutcome::Delivered,
                        Err(e) => {
                            warn!(
                                target: "ls.mesh",
                                remote_id = %remote_id,
                                kind = envelope.kind().as_str(),
                                error = %e,
                                "Peer connection rejected signal, closing link"
                            );
                            close_link(link).await;
                            SignalOutcome::Failed
                        }
                    };
                }
            }
        }

        if envelope.kind() != SignalKind::Offer {
            debug!(
                target: "ls.mesh",
                remote_id = %remote_id,
                kind = envelope.kind().as_str(),
                "No connection for signal, dropping"
            );
            return SignalOutcome::Dropped;
        }

        let epoch = self.allocate_epoch();
        let sink = self.sink(remote_id, epoch);
        let created = self
            .factory
            .create(remote_id, NegotiationRole::Responder, local_stream, sink)
            .await;

        let link = self
            .links
            .entry(remote_id.clone())
            .or_insert_with(|| PeerLink {
                remote_id: remote_id.clone(),
                connection: None,
                role: None,
                remote_flags: envelope.flags,
                status: PeerLinkStatus::Pending,
                epoch,
                has_remote_stream: false,
            });
        close_link(link).await;
        link.epoch = epoch;
        link.role = Some(NegotiationRole::Responder);
        link.remote_flags = envelope.flags;
        link.has_remote_stream = false;

        let outcome = match created {
            Ok(connection) => {
                info!(
                    target: "ls.mesh",
                    remote_id = %remote_id,
                    "Answering peer connection offer"
                );
                let result = connection.signal(envelope.signal.clone()).await;
                link.connection = Some(connection);
                link.status = PeerLinkStatus::Pending;
                match result {
                    Ok(()) => SignalOutcome::Answered,
                    Err(e) => {
                        warn!(
                            target: "ls.mesh",
                            remote_id = %remote_id,
                            error = %e,
                            "Responder rejected offer, closing link"
                        );
                        close_link(link).await;
                        SignalOutcome::Failed
                    }
                }
            }
            Err(e) => {
                warn!(
                    target: "ls.mesh",
                    remote_id = %remote_id,
                    error = %e,
                    "Failed to create responding connection"
                );
                SignalOutcome::Failed
            }
        };

        metrics::set_peer_links_active(self.links.len());
        outcome
    }

    /// Apply a connection event. Returns a payload to relay, if any.
    pub async fn handle_peer_event(
        &mut self,
        remote_id: &ParticipantId,
        link_epoch: u64,
        event: PeerEvent,
    ) -> Option<SignalPayload> {
        let Some(link) = self.links.get_mut(remote_id) else {
            debug!(
                target: "ls.mesh",
                remote_id = %remote_id,
                "Event for untracked peer, ignoring"
            );
            return None;
        };
        if link.epoch != link_epoch {
            debug!(
                target: "ls.mesh",
                remote_id = %remote_id,
                link_epoch,
                current_epoch = link.epoch,
                "Event from replaced connection, ignoring"
            );
            return None;
        }

        match event {
            PeerEvent::Signal(payload) => {
                (link.status != PeerLinkStatus::Closed).then_some(payload)
            }
            PeerEvent::Connected => {
                link.status = PeerLinkStatus::Connected;
                info!(target: "ls.mesh", remote_id = %remote_id, "Peer connected");
                None
            }
            PeerEvent::RemoteStream { stream_id } => {
                link.has_remote_stream = true;
                debug!(
                    target: "ls.mesh",
                    remote_id = %remote_id,
                    stream_id = %stream_id,
                    "Remote stream attached"
                );
                None
            }
            PeerEvent::Error(reason) => {
                warn!(
                    target: "ls.mesh",
                    remote_id = %remote_id,
                    reason = %reason,
                    "Peer connection error, link closed"
                );
                close_link(link).await;
                None
            }
            PeerEvent::Closed => {
                debug!(target: "ls.mesh", remote_id = %remote_id, "Peer connection closed");
                close_link(link).await;
                None
            }
        }
    }

    /// Record flags announced outside a signal envelope.
    pub fn update_remote_flags(&mut self, remote_id: &ParticipantId, flags: MediaFlags) {
        if let Some(link) = self.links.get_mut(remote_id) {
            link.remote_flags = flags;
        }
    }

    /// Destroy one link. Returns `false` if it was not tracked.
    pub async fn remove(&mut self, remote_id: &ParticipantId) -> bool {
        let Some(mut link) = self.links.remove(remote_id) else {
            return false;
        };
        close_link(&mut link).await;
        metrics::set_peer_links_active(self.links.len());
        info!(target: "ls.mesh", remote_id = %remote_id, "Peer link destroyed");
        true
    }

    /// Destroy every link. Returns how many were removed.
    pub async fn clear(&mut self) -> usize {
        let count = self.links.len();
        for (_, mut link) in self.links.drain() {
            close_link(&mut link).await;
        }
        metrics::set_peer_links_active(0);
        if count > 0 {
            info!(target: "ls.mesh", count, "All peer links destroyed");
        }
        count
    }

    /// Swap the outgoing video track on every live link.
    ///
    /// Each link is attempted independently. Failures are logged and
    /// returned, never propagated, and never stop the other attempts.
    pub async fn replace_video_track(&self, track: &Arc<MediaTrack>) -> Vec<TrackReplacement> {
        let attempts = self.links.values().filter_map(|link| {
            let connection = link.connection.as_ref()?;
            (link.status != PeerLinkStatus::Closed).then(|| {
                let track = Arc::clone(track);
                let remote_id = link.remote_id.clone();
                async move {
                    let result = connection.replace_video_track(track).await;
                    TrackReplacement { remote_id, result }
                }
            })
        });

        let results = join_all(attempts).await;
        for outcome in &results {
            metrics::record_track_replacement(outcome.result.is_ok());
            if let Err(e) = &outcome.result {
                warn!(
                    target: "ls.mesh",
                    remote_id = %outcome.remote_id,
                    error = %e,
                    "Video track replacement failed on one link"
                );
            }
        }
        results
    }
}

async fn close_link(link: &mut PeerLink) {
    if let Some(connection) = link.connection.take() {
        connection.close().await;
    }
    link.status = PeerLinkStatus::Closed;
}
