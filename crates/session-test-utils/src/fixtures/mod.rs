//! Pre-configured test data and wiring for runtime tests.

use common::types::{CourseId, ParticipantId, Role, SessionId, UserId};
use session_core::media::{MemoryPreferenceStore, PreferenceStore};
use session_core::reconnect::BackoffPolicy;
use session_core::runtime::{
    Collaborators, CourseInfo, LocalProfile, SessionNotice, SessionRuntime, SessionRuntimeHandle,
    SessionSetup, SessionSnapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::mock_delivery::{MockLocalDelivery, MockUploader};
use crate::mock_media::{MockEncoder, MockMediaDevices};
use crate::mock_peers::MockPeerFactory;
use crate::mock_relay::MockRelay;

/// How long helpers wait before failing a test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Test participant profile.
#[must_use]
pub fn profile(name: &str, role: Role) -> LocalProfile {
    LocalProfile {
        user_id: Some(UserId::new(format!("user-{name}"))),
        name: name.to_string(),
        role,
    }
}

/// Course used by recording tests.
#[must_use]
pub fn course(id: &str) -> CourseInfo {
    CourseInfo {
        course_id: CourseId::new(id),
        course_name: Some("Systems Programming".to_string()),
        category: Some("engineering".to_string()),
    }
}

/// Setup for a courseless session with the default backoff.
#[must_use]
pub fn setup(session_id: &str, name: &str, role: Role) -> SessionSetup {
    SessionSetup::new(SessionId::new(session_id), profile(name, role))
}

/// One participant's worth of mocks around a shared relay.
pub struct MockEnvironment {
    pub relay: MockRelay,
    pub peers: Arc<MockPeerFactory>,
    pub devices: Arc<MockMediaDevices>,
    pub preferences: Arc<MemoryPreferenceStore>,
    pub encoder: Arc<MockEncoder>,
    pub uploader: Arc<MockUploader>,
    pub local: Arc<MockLocalDelivery>,
}

impl MockEnvironment {
    #[must_use]
    pub fn new(relay: MockRelay) -> Self {
        Self {
            relay,
            peers: Arc::new(MockPeerFactory::new()),
            devices: Arc::new(MockMediaDevices::new()),
            preferences: Arc::new(MemoryPreferenceStore::new()),
            encoder: Arc::new(MockEncoder::new()),
            uploader: Arc::new(MockUploader::accepting()),
            local: Arc::new(MockLocalDelivery::new()),
        }
    }

    #[must_use]
    pub fn with_devices(mut self, devices: MockMediaDevices) -> Self {
        self.devices = Arc::new(devices);
        self
    }

    #[must_use]
    pub fn with_preferences(mut self, preferences: MemoryPreferenceStore) -> Self {
        self.preferences = Arc::new(preferences);
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: MockEncoder) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    #[must_use]
    pub fn with_uploader(mut self, uploader: MockUploader) -> Self {
        self.uploader = Arc::new(uploader);
        self
    }

    #[must_use]
    pub fn with_local_delivery(mut self, local: MockLocalDelivery) -> Self {
        self.local = Arc::new(local);
        self
    }

    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            connector: Arc::new(self.relay.clone()),
            peers: Arc::clone(&self.peers) as _,
            devices: Arc::clone(&self.devices) as _,
            preferences: Arc::clone(&self.preferences) as Arc<dyn PreferenceStore>,
            encoder: Arc::clone(&self.encoder) as _,
            uploader: Arc::clone(&self.uploader) as _,
            local_delivery: Arc::clone(&self.local) as _,
        }
    }

    /// Spawn a runtime and subscribe to its notices before it starts work.
    #[must_use]
    pub fn spawn(&self, setup: SessionSetup) -> TestSession {
        let (handle, task) = SessionRuntime::spawn(setup, self.collaborators());
        let notices = handle.subscribe();
        TestSession {
            handle,
            task,
            notices,
        }
    }
}

/// A spawned runtime under test.
pub struct TestSession {
    pub handle: SessionRuntimeHandle,
    pub task: JoinHandle<()>,
    pub notices: broadcast::Receiver<SessionNotice>,
}

impl TestSession {
    /// Wait for the first notice matching `predicate`, skipping others.
    pub async fn expect_notice<F>(&mut self, predicate: F) -> SessionNotice
    where
        F: Fn(&SessionNotice) -> bool,
    {
        wait_for_notice(&mut self.notices, predicate).await
    }

    /// Wait for the channel confirmation and return the local id.
    pub async fn connected(&mut self) -> ParticipantId {
        match self
            .expect_notice(|n| matches!(n, SessionNotice::Connected { .. }))
            .await
        {
            SessionNotice::Connected { local_id } => local_id,
            other => panic!("expected a connected notice, got {other:?}"),
        }
    }

    /// Poll snapshots until `predicate` holds.
    pub async fn eventually<F>(&self, predicate: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        eventually(&self.handle, predicate).await
    }
}

/// Fast retries for tests that do not check the schedule itself.
#[must_use]
pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_attempts: 5,
        connect_timeout: Duration::from_millis(500),
    }
}

/// Wait for the first notice matching `predicate`.
///
/// # Panics
///
/// When nothing matches within [`WAIT_TIMEOUT`] or the runtime is gone.
pub async fn wait_for_notice<F>(
    notices: &mut broadcast::Receiver<SessionNotice>,
    predicate: F,
) -> SessionNotice
where
    F: Fn(&SessionNotice) -> bool,
{
    let found = tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match notices.recv().await {
                Ok(notice) if predicate(&notice) => return notice,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("runtime stopped before the expected notice")
                }
            }
        }
    })
    .await;
    found.expect("timed out waiting for a notice")
}

/// Poll snapshots until `predicate` holds.
///
/// # Panics
///
/// When the condition does not hold within [`WAIT_TIMEOUT`].
pub async fn eventually<F>(handle: &SessionRuntimeHandle, predicate: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let found = tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            let snapshot = handle.snapshot().await.expect("runtime is running");
            if predicate(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    found.expect("condition never held")
}
