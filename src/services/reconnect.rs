use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backend::transport::TransportError;

/// Exponential backoff parameters for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay; attempt `n` waits `base * 2^n`, capped.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Attempts allowed before giving up and entering the error state.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            max_attempts: 6,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given 1-based attempt: `min(base * 2^attempt, cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^20 times the base already dwarfs any sane cap.
        let exponent = attempt.min(20);
        (self.base * 2u32.pow(exponent)).min(self.cap)
    }
}

/// Connection lifecycle as observed by the UI's status badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none requested.
    Disconnected,
    /// First attempt in progress.
    Connecting,
    /// Live connection.
    Connected,
    /// Connection dropped; a retry is scheduled.
    Reconnecting {
        /// 1-based retry attempt about to run.
        attempt: u32,
    },
    /// Retries exhausted; an explicit `connect` call is required to resume.
    Error,
}

/// The connect/disconnect callback pair the manager drives.
///
/// `establish` performs the full resubscribe-and-resync; `teardown` releases
/// the subscription when the owner disconnects explicitly.
pub trait Connector: Send + Sync {
    /// Attempt to (re-)establish the connection.
    fn establish(&self) -> BoxFuture<'static, Result<(), TransportError>>;
    /// Release transport resources after an explicit disconnect.
    fn teardown(&self) -> BoxFuture<'static, ()>;
}

enum Command {
    Connect,
    ConnectionLost,
    Disconnect,
    Shutdown,
}

/// Cloneable handle used to report outages into the manager from elsewhere
/// (typically the feed-status watcher).
#[derive(Clone)]
pub struct ConnectionNotifier {
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionNotifier {
    /// Report that the live connection dropped, scheduling a retry.
    pub fn connection_lost(&self) {
        let _ = self.commands.send(Command::ConnectionLost);
    }
}

/// Supervises one logical connection, retrying with exponential backoff.
///
/// Shared by every subscription-based feature: the manager owns only the
/// retry loop and the published [`ConnectionState`]; what "connecting" means
/// is delegated to the injected [`Connector`].
pub struct ReconnectManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl ReconnectManager {
    /// Spawn the supervision loop around the given connector.
    pub fn spawn(policy: BackoffPolicy, connector: Arc<dyn Connector>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let task = tokio::spawn(run(policy, connector, cmd_rx, state_tx));
        Self {
            commands: cmd_tx,
            state: state_rx,
            task,
        }
    }

    /// Subscribe to connection state updates.
    pub fn watcher(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// A cloneable handle for reporting outages into this manager.
    pub fn notifier(&self) -> ConnectionNotifier {
        ConnectionNotifier {
            commands: self.commands.clone(),
        }
    }

    /// Request a connection; also resumes from the terminal error state.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Report that the live connection dropped, scheduling a retry.
    pub fn connection_lost(&self) {
        let _ = self.commands.send(Command::ConnectionLost);
    }

    /// Disconnect explicitly, cancelling any scheduled retry.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Stop the supervision loop entirely.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

async fn run(
    policy: BackoffPolicy,
    connector: Arc<dyn Connector>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Connect => {
                if !attempt_cycle(&policy, &connector, &mut commands, &state, 0).await {
                    return;
                }
            }
            Command::ConnectionLost => {
                if *state.borrow() != ConnectionState::Connected {
                    continue;
                }
                // Lost an established connection: retry starting at attempt 1,
                // which waits before reconnecting.
                if !attempt_cycle(&policy, &connector, &mut commands, &state, 1).await {
                    return;
                }
            }
            Command::Disconnect => {
                connector.teardown().await;
                let _ = state.send(ConnectionState::Disconnected);
            }
            Command::Shutdown => return,
        }
    }
}

/// One connect cycle: attempt, back off, repeat until success, explicit
/// disconnect, or attempt exhaustion. Returns `false` when the loop must
/// shut down.
async fn attempt_cycle(
    policy: &BackoffPolicy,
    connector: &Arc<dyn Connector>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    state: &watch::Sender<ConnectionState>,
    mut attempt: u32,
) -> bool {
    loop {
        if attempt == 0 {
            let _ = state.send(ConnectionState::Connecting);
        } else {
            let _ = state.send(ConnectionState::Reconnecting { attempt });
            let delay = policy.delay_for(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

            // The wait is cancellable: an explicit disconnect during the
            // backoff must prevent the scheduled attempt from firing. A
            // redundant loss report does not shorten the remaining delay.
            let wait = sleep(delay);
            tokio::pin!(wait);
            let restart = loop {
                tokio::select! {
                    _ = &mut wait => break false,
                    command = commands.recv() => match command {
                        Some(Command::Disconnect) => {
                            connector.teardown().await;
                            let _ = state.send(ConnectionState::Disconnected);
                            return true;
                        }
                        Some(Command::Connect) => break true,
                        Some(Command::ConnectionLost) => {}
                        Some(Command::Shutdown) | None => return false,
                    },
                }
            };
            if restart {
                attempt = 0;
                continue;
            }
        }

        match connector.establish().await {
            Ok(()) => {
                // Success resets the attempt counter for the next outage.
                let _ = state.send(ConnectionState::Connected);
                return true;
            }
            Err(err) => {
                warn!(attempt, error = %err, "connection attempt failed");
                attempt += 1;
                if attempt > policy.max_attempts {
                    let _ = state.send(ConnectionState::Error);
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct ScriptedConnector {
        calls: AtomicU32,
        failures_before_success: u32,
    }

    impl ScriptedConnector {
        fn new(failures_before_success: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures_before_success,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Connector for ScriptedConnector {
        fn establish(&self) -> BoxFuture<'static, Result<(), TransportError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let ok = call >= self.failures_before_success;
            Box::pin(async move {
                if ok {
                    Ok(())
                } else {
                    Err(TransportError::ChannelClosed("scripted failure".into()))
                }
            })
        }

        fn teardown(&self) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    async fn wait_for_state(
        watcher: &mut watch::Receiver<ConnectionState>,
        target: ConnectionState,
    ) {
        loop {
            if *watcher.borrow_and_update() == target {
                return;
            }
            watcher.changed().await.expect("state channel open");
        }
    }

    #[test]
    fn backoff_delays_follow_the_documented_sequence() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.delay_for(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn backoff_delays_never_decrease() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=32 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous);
            assert!(delay <= policy.cap);
            previous = delay;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connects_after_transient_failures_and_resets_attempts() {
        let connector = ScriptedConnector::new(2);
        let manager = ReconnectManager::spawn(BackoffPolicy::default(), connector.clone());
        let mut watcher = manager.watcher();

        manager.connect();
        wait_for_state(&mut watcher, ConnectionState::Connected).await;
        assert_eq!(connector.calls(), 3);

        // A later outage starts the backoff over from attempt 1 and succeeds
        // on the first retry.
        manager.connection_lost();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 4);
        assert_eq!(*watcher.borrow_and_update(), ConnectionState::Connected);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_into_the_error_state() {
        let connector = ScriptedConnector::new(u32::MAX);
        let policy = BackoffPolicy {
            max_attempts: 2,
            ..BackoffPolicy::default()
        };
        let manager = ReconnectManager::spawn(policy, connector.clone());
        let mut watcher = manager.watcher();

        manager.connect();
        wait_for_state(&mut watcher, ConnectionState::Error).await;

        // Initial attempt plus two retries, then nothing further.
        assert_eq!(connector.calls(), 3);

        // An explicit connect resumes from the terminal state.
        manager.connect();
        wait_for_state(&mut watcher, ConnectionState::Error).await;
        assert_eq!(connector.calls(), 6);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_a_scheduled_retry() {
        let connector = ScriptedConnector::new(u32::MAX);
        let manager = ReconnectManager::spawn(BackoffPolicy::default(), connector.clone());
        let mut watcher = manager.watcher();

        manager.connect();
        wait_for_state(&mut watcher, ConnectionState::Reconnecting { attempt: 1 }).await;
        let calls_before = connector.calls();

        manager.disconnect();
        wait_for_state(&mut watcher, ConnectionState::Disconnected).await;

        // Let virtual time race far past the scheduled delay: the cancelled
        // attempt must not fire.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.calls(), calls_before);

        manager.shutdown().await;
    }
}
