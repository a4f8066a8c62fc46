//! In-process relay for runtime tests.
//!
//! Implements [`SignalingConnector`] and routes events between the
//! connections it handed out, the way the real relay does:
//!
//! - `join-session` announces the member to everyone else in the session
//! - `get-session-users` answers with everyone else already joined
//! - `signal` goes to its `to` connection only
//! - state, hand, whiteboard events fan out to the rest of the session
//! - `admin-action` becomes an `admin-command` to the target
//! - a closed connection becomes `user-left` for everyone else
//!
//! # Example
//!
//! ```rust,ignore
//! let relay = MockRelay::new().with_connection_ids(["b2", "a1"]);
//! let env = MockEnvironment::new(relay.clone());
//! // spawn runtimes with env.collaborators()...
//! relay.drop_connection(&ParticipantId::new("b2"), "network lost").await;
//! ```

use async_trait::async_trait;
use common::types::{ParticipantId, SessionId};
use session_core::errors::SessionError;
use session_core::signaling::{ChannelEventSink, ChannelHandle, SignalingConnector};
use signal_protocol::{
    AdminCommand, ClientMessage, HandRaisedChanged, ParticipantAnnouncement,
    ServerMessage, StreamStateChanged, UserLeft, WhiteboardBroadcast,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct RelayConnection {
    id: ParticipantId,
    session_id: SessionId,
    events: ChannelEventSink,
    cancel_token: CancellationToken,
    member: Option<ParticipantAnnouncement>,
}

#[derive(Default)]
struct RelayState {
    connections: Vec<RelayConnection>,
    scripted_ids: VecDeque<ParticipantId>,
    next_id: usize,
    sent: Vec<(ParticipantId, ClientMessage)>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<RelayState>,
    refuse: AtomicBool,
    stall: AtomicBool,
    connect_attempts: AtomicUsize,
}

/// Routing relay. Clones share state.
#[derive(Clone, Default)]
pub struct MockRelay {
    inner: Arc<Inner>,
}

type Delivery = (ChannelEventSink, ServerMessage);

impl MockRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out these connection ids first, in order.
    #[must_use]
    pub fn with_connection_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .state
            .lock()
            .unwrap()
            .scripted_ids
            .extend(ids.into_iter().map(ParticipantId::new));
        self
    }

    /// Queue more ids for later connections.
    pub fn push_connection_id(&self, id: &str) {
        self.inner
            .state
            .lock()
            .unwrap()
            .scripted_ids
            .push_back(ParticipantId::new(id));
    }

    /// Fail every connection attempt while set.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Never confirm connection attempts while set.
    pub fn stall_connections(&self, stall: bool) {
        self.inner.stall.store(stall, Ordering::SeqCst);
    }

    /// Attempts so far, refused and stalled ones included.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Ids of the open connections.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ParticipantId> {
        self.inner
            .state
            .lock()
            .unwrap()
            .connections
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    /// Every event any client sent, in arrival order.
    #[must_use]
    pub fn sent(&self) -> Vec<(ParticipantId, ClientMessage)> {
        self.inner.state.lock().unwrap().sent.clone()
    }

    /// Events sent from one connection.
    #[must_use]
    pub fn sent_by(&self, id: &ParticipantId) -> Vec<ClientMessage> {
        self.sent()
            .into_iter()
            .filter(|(from, _)| from == id)
            .map(|(_, message)| message)
            .collect()
    }

    /// Wait until one connection has sent at least `count` events.
    ///
    /// # Panics
    ///
    /// When that does not happen within [`WAIT_TIMEOUT`](crate::WAIT_TIMEOUT).
    pub async fn wait_for_sent(&self, id: &ParticipantId, count: usize) -> Vec<ClientMessage> {
        let found = tokio::time::timeout(crate::WAIT_TIMEOUT, async {
            loop {
                let sent = self.sent_by(id);
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await;
        found.expect("connection never sent enough events")
    }

    /// Push an event to one connection as if the relay produced it.
    pub async fn inject(&self, to: &ParticipantId, message: ServerMessage) {
        let sink = {
            let state = self.inner.state.lock().unwrap();
            state
                .connections
                .iter()
                .find(|c| &c.id == to)
                .map(|c| c.events.clone())
        };
        if let Some(sink) = sink {
            sink.message(message).await;
        }
    }

    /// Drop a connection from the relay side.
    pub async fn drop_connection(&self, id: &ParticipantId, reason: &str) {
        let removed = {
            let mut state = self.inner.state.lock().unwrap();
            state
                .connections
                .iter()
                .position(|c| &c.id == id)
                .map(|index| {
                    let connection = state.connections.remove(index);
                    let deliveries = departure(&state, &connection);
                    (connection, deliveries)
                })
        };
        let Some((connection, deliveries)) = removed else {
            return;
        };
        connection.events.disconnected(reason).await;
        deliver(deliveries).await;
    }

    fn assign_id(&self) -> ParticipantId {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(id) = state.scripted_ids.pop_front() {
            return id;
        }
        state.next_id += 1;
        ParticipantId::new(format!("sock-{:03}", state.next_id))
    }

    /// Record and route one client event.
    async fn route(&self, from: &ParticipantId, message: ClientMessage) {
        let deliveries = {
            let mut state = self.inner.state.lock().unwrap();
            state.sent.push((from.clone(), message.clone()));
            route_locked(&mut state, from, message)
        };
        deliver(deliveries).await;
    }

    /// The client side closed its channel.
    async fn closed(&self, id: &ParticipantId) {
        let deliveries = {
            let mut state = self.inner.state.lock().unwrap();
            match state.connections.iter().position(|c| &c.id == id) {
                Some(index) => {
                    let connection = state.connections.remove(index);
                    departure(&state, &connection)
                }
                None => Vec::new(),
            }
        };
        deliver(deliveries).await;
    }
}

#[async_trait]
impl SignalingConnector for MockRelay {
    async fn connect(
        &self,
        session_id: &SessionId,
        events: ChannelEventSink,
    ) -> Result<ChannelHandle, SessionError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(SessionError::Channel("connection refused".to_string()));
        }
        if self.inner.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let id = self.assign_id();
        let cancel_token = CancellationToken::new();
        let (outbound_tx, mut outbound_rx) = mpsc::channel(64);

        self.inner.state.lock().unwrap().connections.push(RelayConnection {
            id: id.clone(),
            session_id: session_id.clone(),
            events: events.clone(),
            cancel_token: cancel_token.clone(),
            member: None,
        });

        let relay = self.clone();
        let pump_id = id.clone();
        let pump_token = cancel_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    message = outbound_rx.recv() => {
                        let Some(message) = message else { break };
                        relay.route(&pump_id, message).await;
                    }
                    () = pump_token.cancelled() => break,
                }
            }
            relay.closed(&pump_id).await;
        });

        Ok(ChannelHandle::new(
            id,
            events.generation(),
            outbound_tx,
            cancel_token,
        ))
    }
}

fn route_locked(
    state: &mut RelayState,
    from: &ParticipantId,
    message: ClientMessage,
) -> Vec<Delivery> {
    let Some(sender) = state.connections.iter().find(|c| &c.id == from) else {
        return Vec::new();
    };
    let session_id = sender.session_id.clone();

    let others = |state: &RelayState| -> Vec<ChannelEventSink> {
        state
            .connections
            .iter()
            .filter(|c| &c.id != from && c.session_id == session_id && c.member.is_some())
            .map(|c| c.events.clone())
            .collect()
    };
    let fan_out = |state: &RelayState, message: ServerMessage| -> Vec<Delivery> {
        others(state)
            .into_iter()
            .map(|sink| (sink, message.clone()))
            .collect()
    };

    match message {
        ClientMessage::JoinSession(join) => {
            let member = ParticipantAnnouncement {
                participant_id: from.clone(),
                user_id: join.user_id,
                role: join.user_role,
                name: join.user_name,
                flags: join.flags,
            };
            let deliveries = fan_out(state, ServerMessage::UserJoined(member.clone()));
            if let Some(connection) = state.connections.iter_mut().find(|c| &c.id == from) {
                connection.member = Some(member);
            }
            deliveries
        }
        ClientMessage::GetSessionUsers(_) => {
            let members = state
                .connections
                .iter()
                .filter(|c| &c.id != from && c.session_id == session_id)
                .filter_map(|c| c.member.clone())
                .collect();
            state
                .connections
                .iter()
                .find(|c| &c.id == from)
                .map(|c| vec![(c.events.clone(), ServerMessage::ExistingUsers(members))])
                .unwrap_or_default()
        }
        ClientMessage::Signal(envelope) => state
            .connections
            .iter()
            .find(|c| c.id == envelope.to)
            .map(|c| vec![(c.events.clone(), ServerMessage::Signal(envelope.clone()))])
            .unwrap_or_default(),
        ClientMessage::StreamStateChange(change) => {
            if let Some(member) = state
                .connections
                .iter_mut()
                .find(|c| &c.id == from)
                .and_then(|c| c.member.as_mut())
            {
                member.flags = change.flags;
            }
            fan_out(
                state,
                ServerMessage::StreamStateChanged(StreamStateChanged {
                    participant_id: from.clone(),
                    flags: change.flags,
                }),
            )
        }
        ClientMessage::HandRaisedChange(change) => fan_out(
            state,
            ServerMessage::HandRaisedChanged(HandRaisedChanged {
                participant_id: from.clone(),
                is_hand_raised: change.is_hand_raised,
            }),
        ),
        ClientMessage::AdminAction(request) => state
            .connections
            .iter()
            .find(|c| c.id == request.target_id)
            .map(|c| {
                vec![(
                    c.events.clone(),
                    ServerMessage::AdminCommand(AdminCommand {
                        action: request.action,
                        target_id: Some(request.target_id.clone()),
                        from: Some(from.clone()),
                    }),
                )]
            })
            .unwrap_or_default(),
        ClientMessage::WhiteboardDraw(draw) => fan_out(
            state,
            ServerMessage::WhiteboardDraw(WhiteboardBroadcast {
                from: Some(from.clone()),
                op: draw.op,
            }),
        ),
        ClientMessage::LeaveSession(_) => {
            let deliveries = fan_out(
                state,
                ServerMessage::UserLeft(UserLeft {
                    participant_id: from.clone(),
                }),
            );
            if let Some(connection) = state.connections.iter_mut().find(|c| &c.id == from) {
                connection.member = None;
            }
            deliveries
        }
    }
}

/// `user-left` for everyone still in the departed member's session.
fn departure(state: &RelayState, connection: &RelayConnection) -> Vec<Delivery> {
    connection.cancel_token.cancel();
    if connection.member.is_none() {
        return Vec::new();
    }
    state
        .connections
        .iter()
        .filter(|c| c.session_id == connection.session_id && c.member.is_some())
        .map(|c| {
            (
                c.events.clone(),
                ServerMessage::UserLeft(UserLeft {
                    participant_id: connection.id.clone(),
                }),
            )
        })
        .collect()
}

async fn deliver(deliveries: Vec<Delivery>) {
    for (sink, message) in deliveries {
        sink.message(message).await;
    }
}
