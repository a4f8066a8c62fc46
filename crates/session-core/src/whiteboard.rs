//! Whiteboard relay.
//!
//! Operations pass through unchanged. Rendering and canvas state belong to
//! whoever takes the event receiver.

use common::types::{ParticipantId, SessionId};
use signal_protocol::{ClientMessage, WhiteboardBroadcast, WhiteboardDraw, WhiteboardOp};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// An operation drawn by another member
#[derive(Debug, Clone, PartialEq)]
pub struct WhiteboardEvent {
    /// Sender, when the relay named one
    pub from: Option<ParticipantId>,
    pub op: WhiteboardOp,
}

/// Operations held for a consumer that has fallen behind.
pub const WHITEBOARD_EVENT_BUFFER: usize = 256;

pub struct WhiteboardRelay {
    session_id: SessionId,
    /// Set once a consumer has taken the receiver.
    events_tx: Option<mpsc::Sender<WhiteboardEvent>>,
    taken: bool,
}

impl WhiteboardRelay {
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            events_tx: None,
            taken: false,
        }
    }

    /// Hand out the inbound event stream. Only the first caller gets it.
    ///
    /// Operations that arrive before this is called are dropped.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<WhiteboardEvent>> {
        if self.taken {
            return None;
        }
        let (events_tx, events_rx) = mpsc::channel(WHITEBOARD_EVENT_BUFFER);
        self.events_tx = Some(events_tx);
        self.taken = true;
        Some(events_rx)
    }

    /// Wrap a local operation for broadcast.
    #[must_use]
    pub fn outbound(&self, op: WhiteboardOp) -> ClientMessage {
        debug!(target: "ls.whiteboard", op = op.name(), "Broadcasting whiteboard operation");
        ClientMessage::WhiteboardDraw(WhiteboardDraw {
            session_id: self.session_id.clone(),
            op,
        })
    }

    /// Forward a broadcast from the relay.
    ///
    /// Echoes of our own operations are dropped, as is anything that arrives
    /// with no consumer or a full queue. Returns `true` if forwarded.
    pub fn inbound(&self, local_id: Option<&ParticipantId>, broadcast: WhiteboardBroadcast) -> bool {
        if broadcast.from.is_some() && broadcast.from.as_ref() == local_id {
            return false;
        }
        let Some(events_tx) = &self.events_tx else {
            debug!(target: "ls.whiteboard", "No whiteboard consumer, dropping operation");
            return false;
        };
        let op = broadcast.op.name();
        match events_tx.try_send(WhiteboardEvent {
            from: broadcast.from,
            op: broadcast.op,
        }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "ls.whiteboard",
                    op,
                    buffer = WHITEBOARD_EVENT_BUFFER,
                    "Whiteboard consumer is behind, dropping operation"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(target: "ls.whiteboard", "Whiteboard consumer went away, dropping operation");
                false
            }
        }
    }
}
