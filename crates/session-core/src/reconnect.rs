//! Reconnection controller.
//!
//! After an unrequested channel loss the session retries with exponential
//! backoff: 1s, 2s, 4s, 8s, then capped at 10s, five attempts by default.
//! Each attempt waits a bounded time for the relay to confirm the channel.
//! Only one retry cycle runs at a time, and a cycle that runs out of
//! attempts leaves the session disconnected until it is restarted.

use common::types::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::observability::metrics;
use crate::runtime::messages::SessionMessage;
use crate::signaling::{ChannelEventSink, ChannelHandle, SignalingConnector};

/// Base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Maximum backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Attempts per reconnection cycle.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How long to wait for the relay to confirm a new channel.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel connectivity as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection in progress
    Connecting,
    /// Channel confirmed
    Connected,
    /// No channel and no retry running
    Disconnected,
    /// Retry cycle in progress
    Reconnecting,
}

/// Backoff and timeout settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given attempt (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.base_delay;
        for _ in 1..attempt {
            delay = (delay * 2).min(self.max_delay);
            if delay == self.max_delay {
                break;
            }
        }
        delay.min(self.max_delay)
    }
}

/// Progress report from a running retry cycle
#[derive(Debug)]
pub enum ReconnectEvent {
    /// About to wait `delay` and then try again
    Attempt { attempt: u32, delay: Duration },
    /// The wait is over and the attempt is being made
    Connecting { attempt: u32 },
    /// The cycle ended
    Finished(ReconnectOutcome),
}

#[derive(Debug)]
pub enum ReconnectOutcome {
    /// A new channel was confirmed
    Connected { handle: ChannelHandle, attempt: u32 },
    /// Every attempt failed
    Exhausted { attempts: u32 },
}

/// A retry cycle the caller should spawn with [`run_reconnect`].
#[derive(Debug, Clone)]
pub struct ReconnectPlan {
    /// Generation of the first attempt; later attempts count up from it
    pub first_generation: u64,
    pub cancel_token: CancellationToken,
}

/// Connection state machine and retry guard.
#[derive(Debug)]
pub struct ReconnectionController {
    policy: BackoffPolicy,
    state: ConnectionState,
    in_flight: Option<CancellationToken>,
    exhausted: bool,
    next_generation: u64,
}

impl ReconnectionController {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Connecting,
            in_flight: None,
            exhausted: false,
            next_generation: 1,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Reserve a channel generation for a single connection attempt.
    pub fn allocate_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.in_flight = None;
        self.exhausted = false;
    }

    /// Start a retry cycle unless one is already running or the last one
    /// gave up.
    ///
    /// The state stays `Disconnected` until the first attempt is made.
    pub fn begin(&mut self) -> Option<ReconnectPlan> {
        if self.in_flight.is_some() {
            return None;
        }
        if self.exhausted {
            self.state = ConnectionState::Disconnected;
            return None;
        }

        let first_generation = self.next_generation;
        self.next_generation += u64::from(self.policy.max_attempts);
        let cancel_token = CancellationToken::new();
        self.in_flight = Some(cancel_token.clone());
        self.state = ConnectionState::Disconnected;

        Some(ReconnectPlan {
            first_generation,
            cancel_token,
        })
    }

    /// An attempt of the running cycle has gone out.
    pub fn on_attempt(&mut self) {
        if self.in_flight.is_some() {
            self.state = ConnectionState::Reconnecting;
        }
    }

    pub fn on_exhausted(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.in_flight = None;
        self.exhausted = true;
    }

    /// Stop a running cycle, if any.
    pub fn cancel(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
    }

    /// Mark the session as closed for good.
    pub fn shutdown(&mut self) {
        self.cancel();
        self.state = ConnectionState::Disconnected;
    }
}

/// Run one retry cycle, reporting progress into the session queue.
#[instrument(skip_all, name = "ls.reconnect", fields(session_id = %session_id))]
pub async fn run_reconnect(
    connector: Arc<dyn SignalingConnector>,
    session_id: SessionId,
    policy: BackoffPolicy,
    first_generation: u64,
    tx: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
) {
    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay_for_attempt(attempt);
        if tx
            .send(SessionMessage::Reconnect(ReconnectEvent::Attempt { attempt, delay }))
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            () = cancel_token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        if tx
            .send(SessionMessage::Reconnect(ReconnectEvent::Connecting { attempt }))
            .await
            .is_err()
        {
            return;
        }

        let generation = first_generation + u64::from(attempt - 1);
        let sink = ChannelEventSink::new(generation, tx.clone());
        let result = tokio::select! {
            () = cancel_token.cancelled() => return,
            result = tokio::time::timeout(policy.connect_timeout, connector.connect(&session_id, sink)) => result,
        };

        match result {
            Ok(Ok(handle)) => {
                metrics::record_reconnect_attempt("success");
                info!(
                    target: "ls.reconnect",
                    attempt,
                    generation,
                    connection_id = %handle.connection_id(),
                    "Reconnected"
                );
                let _ = tx
                    .send(SessionMessage::Reconnect(ReconnectEvent::Finished(
                        ReconnectOutcome::Connected { handle, attempt },
                    )))
                    .await;
                return;
            }
            Ok(Err(e)) => {
                metrics::record_reconnect_attempt("failure");
                warn!(
                    target: "ls.reconnect",
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Reconnection attempt failed"
                );
            }
            Err(_) => {
                metrics::record_reconnect_attempt("timeout");
                warn!(
                    target: "ls.reconnect",
                    attempt,
                    max_attempts = policy.max_attempts,
                    timeout_ms = policy.connect_timeout.as_millis(),
                    "Reconnection attempt timed out"
                );
            }
        }
    }

    warn!(
        target: "ls.reconnect",
        attempts = policy.max_attempts,
        "Reconnection abandoned"
    );
    let _ = tx
        .send(SessionMessage::Reconnect(ReconnectEvent::Finished(
            ReconnectOutcome::Exhausted {
                attempts: policy.max_attempts,
            },
        )))
        .await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::errors::SessionError;
    use async_trait::async_trait;
    use common::types::ParticipantId;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn test_default_delays() {
        let policy = BackoffPolicy::default();
        let delays: Vec<_> = (1..=6).map(|n| policy.delay_for_attempt(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_delay_never_exceeds_cap() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(1),
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(600));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_only_one_cycle_at_a_time() {
        let mut controller = ReconnectionController::new(BackoffPolicy::default());
        let initial = controller.allocate_generation();
        controller.on_connected();

        let plan = controller.begin().unwrap();
        assert_eq!(plan.first_generation, initial + 1);
        assert!(controller.begin().is_none());

        controller.on_connected();
        let next = controller.begin().unwrap();
        assert_eq!(next.first_generation, plan.first_generation + 5);
    }

    #[test]
    fn test_disconnected_until_the_first_attempt() {
        let mut controller = ReconnectionController::new(BackoffPolicy::default());
        controller.on_connected();

        controller.begin().unwrap();
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(controller.is_in_flight());

        controller.on_attempt();
        assert_eq!(controller.state(), ConnectionState::Reconnecting);
        controller.on_connected();
        assert_eq!(controller.state(), ConnectionState::Connected);

        // A stray attempt after the cycle ended changes nothing.
        controller.on_attempt();
        assert_eq!(controller.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_exhaustion_requires_restart() {
        let mut controller = ReconnectionController::new(BackoffPolicy::default());
        controller.begin().unwrap();
        controller.on_exhausted();

        assert!(controller.is_exhausted());
        assert!(controller.begin().is_none());
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_cancel_fires_token() {
        let mut controller = ReconnectionController::new(BackoffPolicy::default());
        let plan = controller.begin().unwrap();
        controller.cancel();
        assert!(plan.cancel_token.is_cancelled());
        assert!(!controller.is_in_flight());
    }

    /// Fails the first `failures` attempts, or hangs forever when `hang` is set.
    struct FlakyConnector {
        failures: u32,
        hang: bool,
        calls: Mutex<Vec<(u64, Instant)>>,
    }

    #[async_trait]
    impl SignalingConnector for FlakyConnector {
        async fn connect(
            &self,
            _session_id: &SessionId,
            events: ChannelEventSink,
        ) -> Result<ChannelHandle, SessionError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((events.generation(), Instant::now()));
                calls.len()
            };
            if self.hang {
                std::future::pending::<()>().await;
            }
            if u32::try_from(call).unwrap() <= self.failures {
                return Err(SessionError::Channel("refused".to_string()));
            }
            let (tx, _rx) = mpsc::channel(1);
            Ok(ChannelHandle::new(
                ParticipantId::new("new-id"),
                events.generation(),
                tx,
                CancellationToken::new(),
            ))
        }
    }

    async fn finished(rx: &mut mpsc::Receiver<SessionMessage>) -> (Vec<u32>, ReconnectOutcome) {
        let mut attempts = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                SessionMessage::Reconnect(ReconnectEvent::Attempt { attempt, .. }) => {
                    attempts.push(attempt);
                }
                SessionMessage::Reconnect(ReconnectEvent::Connecting { attempt }) => {
                    assert_eq!(attempts.last(), Some(&attempt));
                }
                SessionMessage::Reconnect(ReconnectEvent::Finished(outcome)) => {
                    return (attempts, outcome)
                }
                other => panic!("unexpected message {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_until_success() {
        let connector = Arc::new(FlakyConnector {
            failures: 3,
            hang: false,
            calls: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let start = Instant::now();

        tokio::spawn(run_reconnect(
            connector.clone(),
            SessionId::new("s"),
            BackoffPolicy::default(),
            10,
            tx,
            CancellationToken::new(),
        ));

        let (attempts, outcome) = finished(&mut rx).await;
        assert_eq!(attempts, vec![1, 2, 3, 4]);
        match outcome {
            ReconnectOutcome::Connected { handle, attempt } => {
                assert_eq!(attempt, 4);
                assert_eq!(handle.generation(), 13);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let offsets: Vec<_> = connector
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| (*at - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![1, 3, 7, 15]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_attempts_time_out_and_exhaust() {
        let connector = Arc::new(FlakyConnector {
            failures: 0,
            hang: true,
            calls: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let start = Instant::now();

        tokio::spawn(run_reconnect(
            connector.clone(),
            SessionId::new("s"),
            BackoffPolicy::default(),
            1,
            tx,
            CancellationToken::new(),
        ));

        let (attempts, outcome) = finished(&mut rx).await;
        assert_eq!(attempts, vec![1, 2, 3, 4, 5]);
        assert!(matches!(outcome, ReconnectOutcome::Exhausted { attempts: 5 }));
        // Delays 1+2+4+8+10 plus five 10s confirmation timeouts.
        assert_eq!((Instant::now() - start).as_secs(), 75);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_cycle_stops_quietly() {
        let connector = Arc::new(FlakyConnector {
            failures: u32::MAX,
            hang: false,
            calls: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let task = tokio::spawn(run_reconnect(
            connector.clone(),
            SessionId::new("s"),
            BackoffPolicy::default(),
            1,
            tx,
            token.clone(),
        ));

        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionMessage::Reconnect(ReconnectEvent::Attempt { attempt: 1, .. })
        ));
        token.cancel();
        task.await.unwrap();

        assert!(connector.calls.lock().unwrap().is_empty());
        assert!(rx.recv().await.is_none());
    }
}
