//! Integration tests for moderation and the whiteboard relay.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use common::types::{ParticipantId, Role};
use session_core::errors::SessionError;
use session_core::mesh::PeerLinkStatus;
use session_core::runtime::{SessionNotice, SessionSnapshot};
use session_core::whiteboard::WhiteboardEvent;
use session_test_utils::*;
use signal_protocol::{
    AdminAction, AdminCommand, ServerMessage, StrokePoint, StrokeTool, WhiteboardBroadcast, WhiteboardOp,
};

fn id(s: &str) -> ParticipantId {
    ParticipantId::new(s)
}

fn linked(s: &SessionSnapshot, remote: &str) -> bool {
    s.peer_link(&id(remote))
        .is_some_and(|l| l.status == PeerLinkStatus::Connected)
}

/// Alice (`a1`, tutor) and bob (`b2`, student), connected to each other.
async fn classroom(relay: &MockRelay) -> (TestSession, TestSession) {
    let mut alice = MockEnvironment::new(relay.clone()).spawn(setup("room", "alice", Role::Tutor));
    alice.connected().await;
    let mut bob = MockEnvironment::new(relay.clone()).spawn(setup("room", "bob", Role::Student));
    bob.connected().await;
    alice.eventually(|s| linked(s, "b2")).await;
    bob.eventually(|s| linked(s, "a1")).await;
    (alice, bob)
}

fn pen(x: f64, y: f64) -> WhiteboardOp {
    WhiteboardOp::Draw(StrokePoint {
        x,
        y,
        color: "#ff0000".to_string(),
        tool: StrokeTool::Pen,
        line_width: 3.0,
    })
}

#[tokio::test]
async fn test_tutor_mutes_a_student() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (alice, mut bob) = classroom(&relay).await;

    alice
        .handle
        .admin_action(AdminAction::Mute, id("b2"))
        .await
        .unwrap();

    bob.expect_notice(|n| *n == SessionNotice::MutedByHost).await;
    let snapshot = bob.handle.snapshot().await.unwrap();
    assert!(!snapshot.local_flags.audio_on);

    alice
        .eventually(|s| s.participant(&id("b2")).is_some_and(|p| !p.flags.audio_on))
        .await;
}

#[tokio::test]
async fn test_students_cannot_moderate() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (_alice, bob) = classroom(&relay).await;

    let result = bob.handle.admin_action(AdminAction::Kick, id("a1")).await;
    assert!(matches!(result, Err(SessionError::PermissionDenied(_))));

    // Nothing reached the relay.
    assert!(!relay
        .sent_by(&id("b2"))
        .iter()
        .any(|m| matches!(m, signal_protocol::ClientMessage::AdminAction(_))));
}

#[tokio::test]
async fn test_kicked_student_leaves_the_session() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (mut alice, mut bob) = classroom(&relay).await;

    alice
        .handle
        .admin_action(AdminAction::Kick, id("b2"))
        .await
        .unwrap();

    bob.expect_notice(|n| *n == SessionNotice::Kicked).await;
    bob.expect_notice(|n| *n == SessionNotice::Left).await;
    bob.task.await.unwrap();
    assert!(bob.handle.is_closed());

    alice
        .expect_notice(|n| *n == SessionNotice::ParticipantLeft { participant_id: id("b2") })
        .await;
    alice
        .eventually(|s| s.participants.is_empty() && s.peer_links.is_empty())
        .await;
}

#[tokio::test]
async fn test_commands_for_another_participant_are_ignored() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (_alice, mut bob) = classroom(&relay).await;

    for action in [AdminAction::Mute, AdminAction::Kick] {
        relay
            .inject(
                &id("b2"),
                ServerMessage::AdminCommand(AdminCommand {
                    action,
                    target_id: Some(id("c3")),
                    from: Some(id("a1")),
                }),
            )
            .await;
    }

    // Queued behind the commands, so both have been handled by now.
    let snapshot = bob.handle.snapshot().await.unwrap();
    assert!(snapshot.local_flags.audio_on);
    assert!(linked(&snapshot, "a1"));
    assert!(!bob.handle.is_closed());
    assert!(!bob.task.is_finished());
    while let Ok(notice) = bob.notices.try_recv() {
        assert!(!matches!(
            notice,
            SessionNotice::MutedByHost | SessionNotice::Kicked | SessionNotice::Left
        ));
    }
}

#[tokio::test]
async fn test_request_unmute_only_asks() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (alice, mut bob) = classroom(&relay).await;

    bob.handle.toggle_audio().await.unwrap();
    alice
        .handle
        .admin_action(AdminAction::RequestUnmute, id("b2"))
        .await
        .unwrap();

    bob.expect_notice(|n| *n == SessionNotice::UnmuteRequested).await;
    assert!(!bob.handle.snapshot().await.unwrap().local_flags.audio_on);
}

#[tokio::test]
async fn test_whiteboard_operations_reach_other_members() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (alice, bob) = classroom(&relay).await;

    let mut events = bob.handle.take_whiteboard_events().await.unwrap().unwrap();
    assert!(bob.handle.take_whiteboard_events().await.unwrap().is_none());

    alice.handle.send_whiteboard(pen(1.0, 2.0)).await.unwrap();
    alice.handle.send_whiteboard(WhiteboardOp::Clear).await.unwrap();

    let first = tokio::time::timeout(WAIT_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        first,
        WhiteboardEvent {
            from: Some(id("a1")),
            op: pen(1.0, 2.0),
        }
    );
    let second = tokio::time::timeout(WAIT_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(second.op, WhiteboardOp::Clear);
}

#[tokio::test]
async fn test_own_whiteboard_echo_is_dropped() {
    let relay = MockRelay::new().with_connection_ids(["a1"]);
    let env = MockEnvironment::new(relay.clone());
    let mut alice = env.spawn(setup("room", "alice", Role::Tutor));
    alice.connected().await;
    let mut events = alice.handle.take_whiteboard_events().await.unwrap().unwrap();

    relay
        .inject(
            &id("a1"),
            ServerMessage::WhiteboardDraw(WhiteboardBroadcast {
                from: Some(id("a1")),
                op: WhiteboardOp::End,
            }),
        )
        .await;
    relay
        .inject(
            &id("a1"),
            ServerMessage::WhiteboardDraw(WhiteboardBroadcast {
                from: None,
                op: WhiteboardOp::Clear,
            }),
        )
        .await;

    // Only the anonymous operation comes through.
    let event = tokio::time::timeout(WAIT_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        WhiteboardEvent {
            from: None,
            op: WhiteboardOp::Clear,
        }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_whiteboard_needs_a_channel() {
    let relay = MockRelay::new();
    relay.stall_connections(true);
    let env = MockEnvironment::new(relay.clone());
    let session = env.spawn(setup("room", "alice", Role::Tutor));

    // Handled once the first connect attempt has timed out.
    let result = session.handle.send_whiteboard(WhiteboardOp::Clear).await;
    assert!(matches!(result, Err(SessionError::Channel(_))));
    assert!(relay.sent().is_empty());
}
