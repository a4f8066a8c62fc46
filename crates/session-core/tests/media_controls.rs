//! Integration tests for local media controls seen through the session.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use common::types::{ParticipantId, Role};
use session_core::errors::{DeviceError, SessionError};
use session_core::media::{MediaPreferences, MemoryPreferenceStore, PreferenceStore, TrackSource};
use session_core::mesh::PeerLinkStatus;
use session_core::runtime::{SessionNotice, SessionSnapshot};
use session_test_utils::*;

fn id(s: &str) -> ParticipantId {
    ParticipantId::new(s)
}

fn connected_to(remote: &'static str) -> impl Fn(&SessionSnapshot) -> bool {
    move |s: &SessionSnapshot| {
        s.peer_link(&id(remote))
            .is_some_and(|l| l.status == PeerLinkStatus::Connected)
    }
}

/// Alice (`a1`, tutor) and bob (`b2`, student), connected to each other.
async fn pair(relay: &MockRelay) -> (MockEnvironment, TestSession, MockEnvironment, TestSession) {
    let alice_env = MockEnvironment::new(relay.clone());
    let bob_env = MockEnvironment::new(relay.clone());
    let mut alice = alice_env.spawn(setup("room", "alice", Role::Tutor));
    alice.connected().await;
    let mut bob = bob_env.spawn(setup("room", "bob", Role::Student));
    bob.connected().await;
    alice.eventually(connected_to("b2")).await;
    bob.eventually(connected_to("a1")).await;
    (alice_env, alice, bob_env, bob)
}

#[tokio::test]
async fn test_toggles_reach_remote_views_and_preferences() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (alice_env, alice, _bob_env, bob) = pair(&relay).await;

    let flags = alice.handle.toggle_video().await.unwrap();
    assert!(!flags.video_on);
    assert!(flags.audio_on);
    let flags = alice.handle.toggle_audio().await.unwrap();
    assert!(!flags.audio_on);

    bob.eventually(|s| {
        s.participant(&id("a1"))
            .is_some_and(|p| !p.flags.video_on && !p.flags.audio_on)
    })
    .await;

    let saved = alice_env.preferences.load().await.unwrap().unwrap();
    assert_eq!(
        saved,
        MediaPreferences {
            video_on: false,
            audio_on: false,
        }
    );
}

#[tokio::test]
async fn test_saved_preferences_apply_on_join() {
    let relay = MockRelay::new().with_connection_ids(["a1"]);
    let env = MockEnvironment::new(relay.clone()).with_preferences(MemoryPreferenceStore::with(
        MediaPreferences {
            video_on: false,
            audio_on: true,
        },
    ));
    let mut alice = env.spawn(setup("room", "alice", Role::Student));
    alice.connected().await;

    let snapshot = alice.handle.snapshot().await.unwrap();
    assert!(!snapshot.local_flags.video_on);
    assert!(snapshot.local_flags.audio_on);

    let sent = relay.wait_for_sent(&id("a1"), 1).await;
    match &sent[0] {
        signal_protocol::ClientMessage::JoinSession(join) => assert!(!join.flags.video_on),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_devices_still_join_without_media() {
    let relay = MockRelay::new().with_connection_ids(["a1"]);
    let env = MockEnvironment::new(relay.clone()).with_devices(
        MockMediaDevices::builder()
            .deny_user_media(DeviceError::PermissionDenied)
            .build(),
    );
    let mut alice = env.spawn(setup("room", "alice", Role::Student));

    alice
        .expect_notice(|n| matches!(n, SessionNotice::DeviceUnavailable { .. }))
        .await;
    alice.connected().await;

    let snapshot = alice.handle.snapshot().await.unwrap();
    assert!(!snapshot.local_flags.video_on);
    assert!(!snapshot.local_flags.audio_on);
}

#[tokio::test]
async fn test_screen_share_swaps_the_video_track_on_every_link() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (alice_env, alice, _bob_env, bob) = pair(&relay).await;

    let outcome = alice.handle.toggle_screen_share().await.unwrap();
    assert!(outcome.changed);
    assert!(outcome.flags.screen_sharing);
    assert!(outcome.flags.video_on);
    assert_eq!(outcome.replacements.len(), 1);
    assert!(outcome.replacements[0].result.is_ok());

    let display = alice_env.devices.display_streams();
    let screen = display[0].video_track().unwrap();
    assert_eq!(screen.source(), TrackSource::Display);
    assert_eq!(
        alice_env.peers.log().replaced(),
        vec![(id("b2"), screen.id().to_string())]
    );
    assert_eq!(alice_env.devices.display_requests(), vec![false]);

    // The camera stopped; the microphone kept going.
    let user_streams = alice_env.devices.user_streams();
    let camera_stream = &user_streams[0];
    assert!(!camera_stream.video_track().unwrap().is_live());
    assert!(camera_stream.audio_track().unwrap().is_live());

    bob.eventually(|s| {
        s.participant(&id("a1"))
            .is_some_and(|p| p.flags.screen_sharing)
    })
    .await;

    let outcome = alice.handle.toggle_screen_share().await.unwrap();
    assert!(outcome.changed);
    assert!(!outcome.flags.screen_sharing);
    assert!(!screen.is_live());

    let camera = alice_env.devices.user_streams()[1].video_track().unwrap().clone();
    assert_eq!(camera.source(), TrackSource::Camera);
    assert_eq!(
        alice_env.peers.log().replaced().last(),
        Some(&(id("b2"), camera.id().to_string()))
    );
}

#[tokio::test]
async fn test_cancelled_picker_changes_nothing() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (alice_env, alice, _bob_env, _bob) = pair(&relay).await;
    alice_env.devices.fail_next_display(DeviceError::Cancelled);

    let outcome = alice.handle.toggle_screen_share().await.unwrap();
    assert!(!outcome.changed);
    assert!(!outcome.flags.screen_sharing);
    assert!(alice_env.peers.log().replaced().is_empty());

    let snapshot = alice.handle.snapshot().await.unwrap();
    assert!(!snapshot.local_flags.screen_sharing);
}

#[tokio::test]
async fn test_refused_display_capture_is_an_error_and_keeps_camera() {
    let relay = MockRelay::new().with_connection_ids(["a1"]);
    let env = MockEnvironment::new(relay.clone());
    let mut alice = env.spawn(setup("room", "alice", Role::Student));
    alice.connected().await;
    env.devices.fail_next_display(DeviceError::PermissionDenied);

    let result = alice.handle.toggle_screen_share().await;
    assert!(matches!(
        result,
        Err(SessionError::Device(DeviceError::PermissionDenied))
    ));

    let snapshot = alice.handle.snapshot().await.unwrap();
    assert!(!snapshot.local_flags.screen_sharing);
    assert!(snapshot.local_flags.video_on);
}

#[tokio::test]
async fn test_failed_replacement_on_one_link_does_not_undo_the_share() {
    let relay = MockRelay::new().with_connection_ids(["m", "a", "z"]);
    let mia_env = MockEnvironment::new(relay.clone());
    mia_env.peers.fail_replace_for("a");
    let ann_env = MockEnvironment::new(relay.clone());
    let zed_env = MockEnvironment::new(relay.clone());

    let mut mia = mia_env.spawn(setup("room", "mia", Role::Tutor));
    mia.connected().await;
    let mut ann = ann_env.spawn(setup("room", "ann", Role::Student));
    ann.connected().await;
    let mut zed = zed_env.spawn(setup("room", "zed", Role::Student));
    zed.connected().await;
    mia.eventually(|s| connected_to("a")(s) && connected_to("z")(s)).await;

    let outcome = mia.handle.toggle_screen_share().await.unwrap();
    assert!(outcome.changed);
    assert!(outcome.flags.screen_sharing);

    let failed: Vec<_> = outcome
        .replacements
        .iter()
        .filter(|r| r.result.is_err())
        .map(|r| r.remote_id.clone())
        .collect();
    assert_eq!(failed, vec![id("a")]);

    let replaced: Vec<_> = mia_env
        .peers
        .log()
        .replaced()
        .into_iter()
        .map(|(remote, _)| remote)
        .collect();
    assert_eq!(replaced, vec![id("z")]);
}

#[tokio::test]
async fn test_ending_the_shared_screen_restores_the_camera() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (alice_env, mut alice, _bob_env, bob) = pair(&relay).await;

    alice.handle.toggle_screen_share().await.unwrap();
    let screen_id = alice_env.devices.display_streams()[0]
        .video_track()
        .unwrap()
        .id()
        .to_string();

    // Some other track ending is not a reason to stop sharing.
    alice.handle.local_track_ended("unrelated").await.unwrap();
    assert!(alice.handle.snapshot().await.unwrap().local_flags.screen_sharing);

    alice.handle.local_track_ended(screen_id).await.unwrap();
    alice
        .expect_notice(|n| *n == SessionNotice::ScreenShareEnded)
        .await;

    let snapshot = alice.handle.snapshot().await.unwrap();
    assert!(!snapshot.local_flags.screen_sharing);
    assert!(snapshot.local_flags.video_on);

    bob.eventually(|s| {
        s.participant(&id("a1"))
            .is_some_and(|p| !p.flags.screen_sharing)
    })
    .await;
}

#[tokio::test]
async fn test_hand_raise_is_announced_to_others() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (_alice_env, alice, _bob_env, bob) = pair(&relay).await;

    let flags = bob.handle.toggle_hand_raise().await.unwrap();
    assert!(flags.hand_raised);
    alice
        .eventually(|s| s.participant(&id("b2")).is_some_and(|p| p.flags.hand_raised))
        .await;

    // A later stream update does not lower the hand.
    bob.handle.toggle_audio().await.unwrap();
    let snapshot = alice
        .eventually(|s| s.participant(&id("b2")).is_some_and(|p| !p.flags.audio_on))
        .await;
    assert!(snapshot.participant(&id("b2")).unwrap().flags.hand_raised);

    let flags = bob.handle.toggle_hand_raise().await.unwrap();
    assert!(!flags.hand_raised);
    alice
        .eventually(|s| s.participant(&id("b2")).is_some_and(|p| !p.flags.hand_raised))
        .await;
}

#[tokio::test]
async fn test_leaving_stops_every_local_track() {
    let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
    let (alice_env, alice, _bob_env, _bob) = pair(&relay).await;
    alice.handle.toggle_screen_share().await.unwrap();

    alice.handle.leave().await;
    alice.task.await.unwrap();

    for stream in alice_env
        .devices
        .user_streams()
        .iter()
        .chain(alice_env.devices.display_streams().iter())
    {
        assert!(stream.tracks().iter().all(|t| !t.is_live()));
    }
    assert_eq!(alice_env.peers.log().closed(), vec![id("b2")]);
    assert!(matches!(
        alice.handle.toggle_audio().await,
        Err(SessionError::SessionClosed)
    ));
}
