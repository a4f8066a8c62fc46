//! WebSocket transport for the signaling channel.

use async_trait::async_trait;
use common::types::{ParticipantId, SessionId};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use signal_protocol::{codec, ClientMessage, ServerMessage};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ChannelEventSink, ChannelHandle, SignalingConnector};
use crate::errors::SessionError;
use crate::observability::metrics;

/// Outbound queue depth per channel.
const OUTBOUND_BUFFER: usize = 256;

/// Connects to the relay over `ws://` or `wss://`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    relay_url: String,
}

impl WebSocketConnector {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
        }
    }

    #[must_use]
    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(
        &self,
        session_id: &SessionId,
        events: ChannelEventSink,
    ) -> Result<ChannelHandle, SessionError> {
        debug!(
            target: "ls.signaling",
            relay_url = %self.relay_url,
            session_id = %session_id,
            generation = events.generation(),
            "Opening signaling channel"
        );

        let (ws, _response) = tokio_tungstenite::connect_async(self.relay_url.as_str())
            .await
            .map_err(|e| SessionError::Channel(format!("connect {}: {e}", self.relay_url)))?;
        let (write, mut read) = ws.split();

        let connection_id = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match codec::decode::<ServerMessage>(text.as_str()) {
                    Ok(ServerMessage::Connected(connected)) => {
                        // Every later routing decision keys on this id.
                        break ParticipantId::parse(connected.connection_id.as_str())
                            .map_err(|e| SessionError::Channel(format!("relay confirmation: {e}")))?;
                    }
                    Ok(other) => {
                        debug!(
                            target: "ls.signaling",
                            event = other.event_name(),
                            "Event before channel confirmation, ignoring"
                        );
                    }
                    Err(e) => {
                        warn!(target: "ls.signaling", error = %e, "Undecodable frame before confirmation");
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SessionError::Channel(
                        "relay closed the channel before confirming it".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SessionError::Channel(e.to_string())),
            }
        };

        info!(
            target: "ls.signaling",
            connection_id = %connection_id,
            generation = events.generation(),
            "Signaling channel confirmed"
        );

        let cancel_token = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let generation = events.generation();

        tokio::spawn(write_loop(write, outbound_rx, cancel_token.clone()));
        tokio::spawn(read_loop(read, events, cancel_token.clone()));

        Ok(ChannelHandle::new(
            connection_id,
            generation,
            outbound_tx,
            cancel_token,
        ))
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<ClientMessage>,
    cancel_token: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        // Queued events go out before a requested close.
        tokio::select! {
            biased;
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match codec::encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            target: "ls.signaling",
                            event = message.event_name(),
                            error = %e,
                            "Dropping unencodable event"
                        );
                        continue;
                    }
                };
                if let ClientMessage::Signal(envelope) = &message {
                    metrics::record_signal_sent(envelope.kind().as_str());
                }
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!(target: "ls.signaling", error = %e, "Signaling write failed");
                    break;
                }
            }
            () = cancel_token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    debug!(target: "ls.signaling", "Signaling writer stopped");
}

async fn read_loop<S>(mut stream: S, events: ChannelEventSink, cancel_token: CancellationToken)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            () = cancel_token.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match codec::decode::<ServerMessage>(text.as_str()) {
                Ok(message) => {
                    if !events.message(message).await {
                        cancel_token.cancel();
                        break;
                    }
                }
                Err(e) => {
                    warn!(target: "ls.signaling", error = %e, "Ignoring undecodable relay frame");
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                if !cancel_token.is_cancelled() {
                    events.disconnected("relay closed the channel").await;
                }
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if !cancel_token.is_cancelled() {
                    events.disconnected(e.to_string()).await;
                }
                break;
            }
        }
    }
    cancel_token.cancel();
    debug!(target: "ls.signaling", generation = events.generation(), "Signaling reader stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::runtime::messages::SessionMessage;
    use crate::signaling::ChannelEvent;
    use signal_protocol::{Connected, SessionRef, UserLeft};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// One-connection relay: confirms, forwards one client frame back as a
    /// `user-left`, then closes.
    async fn start_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = ws.split();

            let confirm = codec::encode(&ServerMessage::Connected(Connected {
                connection_id: ParticipantId::new("sock-1"),
            }))
            .unwrap();
            tx.send(Message::text(confirm)).await.unwrap();

            while let Some(Ok(frame)) = rx.next().await {
                if let Message::Text(text) = frame {
                    let request: ClientMessage = codec::decode(text.as_str()).unwrap();
                    assert_eq!(request.event_name(), "get-session-users");
                    let reply = codec::encode(&ServerMessage::UserLeft(UserLeft {
                        participant_id: ParticipantId::new("gone"),
                    }))
                    .unwrap();
                    tx.send(Message::text(reply)).await.unwrap();
                    tx.send(Message::Close(None)).await.unwrap();
                    break;
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_connect_waits_for_confirmation_and_relays_events() {
        let url = start_relay().await;
        let (tx, mut rx) = mpsc::channel(8);
        let connector = WebSocketConnector::new(url);

        let handle = connector
            .connect(&SessionId::new("s"), ChannelEventSink::new(4, tx))
            .await
            .unwrap();
        assert_eq!(handle.connection_id().as_str(), "sock-1");
        assert_eq!(handle.generation(), 4);

        handle
            .send(ClientMessage::GetSessionUsers(SessionRef {
                session_id: SessionId::new("s"),
            }))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            SessionMessage::Channel {
                generation,
                event: ChannelEvent::Message(ServerMessage::UserLeft(left)),
            } => {
                assert_eq!(generation, 4);
                assert_eq!(left.participant_id.as_str(), "gone");
            }
            other => panic!("unexpected message {other:?}"),
        }

        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            second,
            SessionMessage::Channel {
                event: ChannelEvent::Disconnected { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_blank_connection_id_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let confirm = codec::encode(&ServerMessage::Connected(Connected {
                connection_id: ParticipantId::new(""),
            }))
            .unwrap();
            ws.send(Message::text(confirm)).await.unwrap();
            // Hold the socket open until the client gives up.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, _rx) = mpsc::channel(1);
        let result = WebSocketConnector::new(format!("ws://{addr}"))
            .connect(&SessionId::new("s"), ChannelEventSink::new(1, tx))
            .await;
        match result {
            Err(SessionError::Channel(reason)) => assert!(reason.contains("participant")),
            other => panic!("expected a refused confirmation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_fails_when_relay_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, _rx) = mpsc::channel(1);
        let result = WebSocketConnector::new(format!("ws://{addr}"))
            .connect(&SessionId::new("s"), ChannelEventSink::new(1, tx))
            .await;
        assert!(matches!(result, Err(SessionError::Channel(_))));
    }
}
