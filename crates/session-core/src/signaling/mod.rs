//! Signaling channel to the relay service.
//!
//! A channel is opened by a [`SignalingConnector`] and is only handed back
//! once the relay has confirmed it with a `connected` event. Inbound events
//! go into the session's queue tagged with the channel generation, so events
//! from a replaced channel can be told apart and dropped.

pub mod websocket;

use async_trait::async_trait;
use common::types::{ParticipantId, SessionId};
use signal_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::SessionError;
use crate::runtime::messages::SessionMessage;

pub use websocket::WebSocketConnector;

/// Something that happened on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Decoded relay event
    Message(ServerMessage),
    /// The channel dropped without being asked to
    Disconnected { reason: String },
}

/// Delivers channel events into the session's inbound queue.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    generation: u64,
    tx: mpsc::Sender<SessionMessage>,
}

impl ChannelEventSink {
    #[must_use]
    pub fn new(generation: u64, tx: mpsc::Sender<SessionMessage>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a relay event. Returns `false` once the session is gone.
    pub async fn message(&self, message: ServerMessage) -> bool {
        self.emit(ChannelEvent::Message(message)).await
    }

    /// Report an unrequested disconnect. Returns `false` once the session is gone.
    pub async fn disconnected(&self, reason: impl Into<String>) -> bool {
        self.emit(ChannelEvent::Disconnected {
            reason: reason.into(),
        })
        .await
    }

    async fn emit(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(SessionMessage::Channel {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// Owning handle to one confirmed channel.
///
/// Dropping the handle closes the channel.
#[derive(Debug)]
pub struct ChannelHandle {
    connection_id: ParticipantId,
    generation: u64,
    outbound: mpsc::Sender<ClientMessage>,
    cancel_token: CancellationToken,
}

impl ChannelHandle {
    #[must_use]
    pub fn new(
        connection_id: ParticipantId,
        generation: u64,
        outbound: mpsc::Sender<ClientMessage>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            connection_id,
            generation,
            outbound,
            cancel_token,
        }
    }

    /// Id the relay assigned to this channel.
    #[must_use]
    pub fn connection_id(&self) -> &ParticipantId {
        &self.connection_id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue an event for the relay.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Channel` if the channel is closed.
    pub async fn send(&self, message: ClientMessage) -> Result<(), SessionError> {
        if self.cancel_token.is_cancelled() {
            return Err(SessionError::Channel("channel closed".to_string()));
        }
        self.outbound
            .send(message)
            .await
            .map_err(|e| SessionError::Channel(format!("channel send failed: {e}")))
    }

    /// Close the channel on purpose. No disconnect event follows.
    pub fn disconnect(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.outbound.is_closed()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Opens confirmed channels to the relay.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Open a channel and wait for the relay's `connected` event.
    ///
    /// Callers bound the wait with their own timeout.
    async fn connect(
        &self,
        session_id: &SessionId,
        events: ChannelEventSink,
    ) -> Result<ChannelHandle, SessionError>;
}
