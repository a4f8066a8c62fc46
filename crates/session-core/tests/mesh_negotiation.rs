//! Integration tests for peer discovery and negotiation through the relay.
//!
//! Every participant runs a full `SessionRuntime` against one shared
//! `MockRelay`; peer connections are scripted mocks.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use common::types::{MediaFlags, ParticipantId, Role};
use session_core::mesh::{NegotiationRole, PeerLinkStatus};
use session_core::runtime::SessionNotice;
use session_test_utils::*;
use signal_protocol::{
    ClientMessage, ParticipantAnnouncement, ServerMessage, SignalEnvelope, SignalPayload, UserLeft,
};

fn id(s: &str) -> ParticipantId {
    ParticipantId::new(s)
}

fn link_connected(snapshot: &session_core::runtime::SessionSnapshot, remote: &str) -> bool {
    snapshot
        .peer_link(&id(remote))
        .is_some_and(|link| link.status == PeerLinkStatus::Connected)
}

#[tokio::test]
async fn test_greater_id_initiates_and_both_sides_connect() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let alice_env = MockEnvironment::new(relay.clone());
    let bob_env = MockEnvironment::new(relay.clone());

    let mut alice = alice_env.spawn(setup("room", "alice", Role::Tutor));
    assert_eq!(alice.connected().await, id("a1"));

    let mut bob = bob_env.spawn(setup("room", "bob", Role::Student));
    assert_eq!(bob.connected().await, id("b2"));

    let joined = alice
        .expect_notice(|n| matches!(n, SessionNotice::ParticipantJoined { .. }))
        .await;
    assert_eq!(
        joined,
        SessionNotice::ParticipantJoined {
            participant_id: id("b2"),
            name: "bob".to_string(),
        }
    );

    let alice_view = alice.eventually(|s| link_connected(s, "b2")).await;
    let bob_view = bob.eventually(|s| link_connected(s, "a1")).await;

    // b2 > a1, so bob offers and alice only ever answers.
    assert_eq!(bob_env.peers.log().roles_for(&id("a1")), vec![NegotiationRole::Initiator]);
    assert_eq!(alice_env.peers.log().roles_for(&id("b2")), vec![NegotiationRole::Responder]);

    let bob_entry = alice_view.participant(&id("b2")).unwrap();
    assert_eq!(bob_entry.name, "bob");
    assert_eq!(bob_entry.role, Role::Student);
    let alice_entry = bob_view.participant(&id("a1")).unwrap();
    assert_eq!(alice_entry.name, "alice");
    assert_eq!(alice_entry.role, Role::Tutor);
}

#[tokio::test]
async fn test_three_participants_form_a_full_mesh() {
    let relay = MockRelay::new().with_connection_ids(["m", "a", "z"]);
    let envs: Vec<_> = (0..3).map(|_| MockEnvironment::new(relay.clone())).collect();

    let mut sessions = Vec::new();
    for (env, name) in envs.iter().zip(["mia", "ann", "zed"]) {
        let mut session = env.spawn(setup("room", name, Role::Student));
        session.connected().await;
        sessions.push(session);
    }

    let ids = ["m", "a", "z"];
    for (index, session) in sessions.iter().enumerate() {
        let local = ids[index];
        let snapshot = session
            .eventually(|s| {
                s.peer_links.len() == 2
                    && s.peer_links
                        .iter()
                        .all(|l| l.status == PeerLinkStatus::Connected)
            })
            .await;
        assert_eq!(snapshot.participants.len(), 2);

        let log = envs[index].peers.log();
        for remote in ids.iter().filter(|r| **r != local) {
            let expected = if local > *remote {
                NegotiationRole::Initiator
            } else {
                NegotiationRole::Responder
            };
            assert_eq!(log.roles_for(&id(remote)), vec![expected], "{local} -> {remote}");
        }
    }
}

#[tokio::test]
async fn test_signal_envelopes_carry_current_flags_and_identity() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let alice_env = MockEnvironment::new(relay.clone());
    let bob_env = MockEnvironment::new(relay.clone());

    let mut alice = alice_env.spawn(setup("room", "alice", Role::Tutor));
    alice.connected().await;
    alice.handle.toggle_audio().await.unwrap();

    let mut bob = bob_env.spawn(setup("room", "bob", Role::Student));
    bob.connected().await;
    alice.eventually(|s| link_connected(s, "b2")).await;

    // join-session, get-session-users, stream-state-change, then the answer
    let answer = relay
        .wait_for_sent(&id("a1"), 4)
        .await
        .into_iter()
        .find_map(|m| match m {
            ClientMessage::Signal(envelope) => Some(envelope),
            _ => None,
        })
        .unwrap();
    assert_eq!(answer.to, id("b2"));
    assert_eq!(answer.from, id("a1"));
    assert!(matches!(answer.signal, SignalPayload::Answer { .. }));
    assert_eq!(answer.name, "alice");
    assert_eq!(answer.role, Role::Tutor);
    assert!(!answer.flags.audio_on);
    assert!(answer.flags.video_on);

    // Bob's view of alice picked up the flags from the envelope.
    let view = bob.eventually(|s| s.participant(&id("a1")).is_some()).await;
    assert!(!view.participant(&id("a1")).unwrap().flags.audio_on);
}

#[tokio::test]
async fn test_signal_for_someone_else_is_ignored() {
    let relay = MockRelay::new().with_connection_ids(["a1"]);
    let env = MockEnvironment::new(relay.clone());
    let mut alice = env.spawn(setup("room", "alice", Role::Student));
    alice.connected().await;

    relay
        .inject(
            &id("a1"),
            ServerMessage::Signal(SignalEnvelope {
                to: id("somebody-else"),
                from: id("x9"),
                signal: SignalPayload::Offer {
                    sdp: "v=0".to_string(),
                },
                role: Role::Student,
                name: "x".to_string(),
                flags: MediaFlags::default(),
            }),
        )
        .await;

    let snapshot = alice.handle.snapshot().await.unwrap();
    assert!(snapshot.peer_links.is_empty());
    assert!(snapshot.participants.is_empty());
    assert!(env.peers.log().created().is_empty());
}

#[tokio::test]
async fn test_departure_removes_link_and_view_entry() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let alice_env = MockEnvironment::new(relay.clone());
    let bob_env = MockEnvironment::new(relay.clone());

    let mut alice = alice_env.spawn(setup("room", "alice", Role::Tutor));
    alice.connected().await;
    let mut bob = bob_env.spawn(setup("room", "bob", Role::Student));
    bob.connected().await;
    alice.eventually(|s| link_connected(s, "b2")).await;

    bob.handle.leave().await;
    bob.task.await.unwrap();

    let left = alice
        .expect_notice(|n| matches!(n, SessionNotice::ParticipantLeft { .. }))
        .await;
    assert_eq!(left, SessionNotice::ParticipantLeft { participant_id: id("b2") });

    let snapshot = alice
        .eventually(|s| s.peer_links.is_empty() && s.participants.is_empty())
        .await;
    assert!(snapshot.peer_link(&id("b2")).is_none());
    assert_eq!(alice_env.peers.log().closed(), vec![id("b2")]);

    // Bob's side closed its own link on the way out.
    assert_eq!(bob_env.peers.log().closed(), vec![id("a1")]);
    assert!(matches!(
        relay.sent_by(&id("b2")).last(),
        Some(ClientMessage::LeaveSession(_))
    ));
}

fn left(participant: &str) -> ServerMessage {
    ServerMessage::UserLeft(UserLeft {
        participant_id: id(participant),
    })
}

/// Notices already published, without waiting for more.
fn drain(session: &mut TestSession) -> Vec<SessionNotice> {
    std::iter::from_fn(|| session.notices.try_recv().ok()).collect()
}

#[tokio::test]
async fn test_repeated_departure_is_reported_once() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let alice_env = MockEnvironment::new(relay.clone());
    let mut alice = alice_env.spawn(setup("room", "alice", Role::Tutor));
    alice.connected().await;
    let mut bob = MockEnvironment::new(relay.clone()).spawn(setup("room", "bob", Role::Student));
    bob.connected().await;
    alice.eventually(|s| link_connected(s, "b2")).await;
    drain(&mut alice);

    relay.inject(&id("a1"), left("b2")).await;
    relay.inject(&id("a1"), left("b2")).await;

    let snapshot = alice.handle.snapshot().await.unwrap();
    assert!(snapshot.peer_links.is_empty());
    assert!(snapshot.participants.is_empty());
    let departures: Vec<_> = drain(&mut alice)
        .into_iter()
        .filter(|n| matches!(n, SessionNotice::ParticipantLeft { .. }))
        .collect();
    assert_eq!(departures, vec![SessionNotice::ParticipantLeft { participant_id: id("b2") }]);
    assert_eq!(alice_env.peers.log().closed(), vec![id("b2")]);
}

#[tokio::test]
async fn test_departure_before_the_offer_removes_the_placeholder() {
    let relay = MockRelay::new().with_connection_ids(["a1"]);
    let env = MockEnvironment::new(relay.clone());
    let mut alice = env.spawn(setup("room", "alice", Role::Tutor));
    alice.connected().await;

    // b2 > a1, so alice only holds a placeholder until b2's offer arrives.
    relay
        .inject(
            &id("a1"),
            ServerMessage::UserJoined(ParticipantAnnouncement {
                participant_id: id("b2"),
                user_id: None,
                role: Role::Student,
                name: "bob".to_string(),
                flags: MediaFlags::default(),
            }),
        )
        .await;
    let snapshot = alice.handle.snapshot().await.unwrap();
    let placeholder = snapshot.peer_link(&id("b2")).unwrap();
    assert_eq!(placeholder.status, PeerLinkStatus::Pending);
    assert!(!placeholder.has_connection);

    relay.inject(&id("a1"), left("b2")).await;

    alice
        .expect_notice(|n| *n == SessionNotice::ParticipantLeft { participant_id: id("b2") })
        .await;
    let snapshot = alice.handle.snapshot().await.unwrap();
    assert!(snapshot.peer_link(&id("b2")).is_none());
    assert!(snapshot.participants.is_empty());
    assert!(env.peers.log().created().is_empty());
}

#[tokio::test]
async fn test_failed_connection_creation_leaves_no_live_link() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let alice_env = MockEnvironment::new(relay.clone());
    let bob_env = MockEnvironment::new(relay.clone());
    bob_env.peers.fail_create_for("a1");

    let mut alice = alice_env.spawn(setup("room", "alice", Role::Student));
    alice.connected().await;
    let mut bob = bob_env.spawn(setup("room", "bob", Role::Student));
    bob.connected().await;

    // Bob still tracks alice as a participant, just without a connection.
    let snapshot = bob.eventually(|s| s.participant(&id("a1")).is_some()).await;
    let link = snapshot.peer_link(&id("a1")).unwrap();
    assert_eq!(link.status, PeerLinkStatus::Closed);
    assert!(!link.has_connection);
    assert!(bob_env.peers.log().created().is_empty());
}
