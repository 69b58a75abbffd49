use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::transport::TransportResult;
use crate::backend::{EventStream, RealtimeTransport, ScopeKey};
use crate::dto::events::ServerChange;

/// Health of the active change feed, published for the reconnect supervisor
/// and the UI's status badge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No feed is open.
    Idle,
    /// A feed is streaming for the named scope.
    Streaming(String),
    /// The feed for the named scope dropped; recovery is the reconnect
    /// manager's job, not this layer's.
    Lost(String),
}

/// A decoded change tagged with the scope it arrived on.
///
/// The consumer drops changes whose scope is no longer current, so an event
/// delivered late from a previous clue cannot corrupt the next one.
#[derive(Debug, Clone)]
pub struct ScopedChange {
    /// Scope the change arrived on.
    pub scope: ScopeKey,
    /// The decoded change.
    pub change: ServerChange,
}

struct ActiveSubscription {
    scope: ScopeKey,
    forward: Arc<Mutex<mpsc::UnboundedSender<ScopedChange>>>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    /// Set by the pump when the underlying stream ends, so a re-subscribe to
    /// the same scope reopens the feed instead of treating it as idempotent.
    dead: Arc<AtomicBool>,
}

/// Maintains at most one live change feed at a time.
///
/// Switching scopes tears the old feed down completely (stop signal sent,
/// pump task joined) before the new one opens. Re-subscribing to the current
/// scope only replaces the handler.
pub struct SubscriptionService {
    realtime: Arc<dyn RealtimeTransport>,
    active: Mutex<Option<ActiveSubscription>>,
    status: watch::Sender<ChannelStatus>,
}

impl SubscriptionService {
    /// Create a service over the given push transport.
    pub fn new(realtime: Arc<dyn RealtimeTransport>) -> Self {
        let (status_tx, _rx) = watch::channel(ChannelStatus::Idle);
        Self {
            realtime,
            active: Mutex::new(None),
            status: status_tx,
        }
    }

    /// Subscribe to feed status updates.
    pub fn status_watcher(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    /// The scope currently subscribed, if any.
    pub async fn current_scope(&self) -> Option<ScopeKey> {
        let guard = self.active.lock().await;
        guard.as_ref().map(|active| active.scope.clone())
    }

    /// Subscribe to `scope`, forwarding decoded changes into `forward`.
    ///
    /// Idempotent for the current scope; for a different scope the existing
    /// feed is fully released first.
    pub async fn subscribe(
        &self,
        scope: ScopeKey,
        forward: mpsc::UnboundedSender<ScopedChange>,
    ) -> TransportResult<()> {
        let mut guard = self.active.lock().await;

        if let Some(active) = guard.as_ref() {
            if active.scope == scope && !active.dead.load(Ordering::SeqCst) {
                let mut slot = active.forward.lock().await;
                *slot = forward;
                debug!(scope = %scope, "handler replaced on existing feed");
                return Ok(());
            }
        }

        if let Some(old) = guard.take() {
            teardown(old).await;
        }

        let stream = self.realtime.open(&scope).await?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let forward = Arc::new(Mutex::new(forward));
        let dead = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(pump(
            scope.clone(),
            stream,
            forward.clone(),
            stop_rx,
            self.status.clone(),
            dead.clone(),
        ));

        let _ = self.status.send(ChannelStatus::Streaming(scope.to_string()));
        *guard = Some(ActiveSubscription {
            scope,
            forward,
            stop: stop_tx,
            task,
            dead,
        });

        Ok(())
    }

    /// Release the active feed; safe to call when already unsubscribed.
    pub async fn unsubscribe(&self) {
        let mut guard = self.active.lock().await;
        if let Some(old) = guard.take() {
            teardown(old).await;
        }
        let _ = self.status.send(ChannelStatus::Idle);
    }
}

/// Stop the pump and wait for it to finish before the channel is considered
/// released.
async fn teardown(active: ActiveSubscription) {
    let _ = active.stop.send(true);
    if let Err(err) = active.task.await {
        warn!(scope = %active.scope, error = %err, "feed pump ended abnormally");
    }
}

/// Read raw events off the transport, decode them at the boundary, and
/// forward them in arrival order. Malformed payloads are logged and dropped,
/// never forwarded and never fatal.
async fn pump(
    scope: ScopeKey,
    mut stream: EventStream,
    forward: Arc<Mutex<mpsc::UnboundedSender<ScopedChange>>>,
    mut stop: watch::Receiver<bool>,
    status: watch::Sender<ChannelStatus>,
    dead: Arc<AtomicBool>,
) {
    let scope_label = scope.to_string();
    loop {
        tokio::select! {
            maybe = stream.next() => match maybe {
                Some(raw) => {
                    if raw.scope != scope_label {
                        warn!(
                            expected = %scope_label,
                            got = %raw.scope,
                            "dropping event from a foreign scope"
                        );
                        continue;
                    }
                    match ServerChange::from_json_str(&raw.payload) {
                        Ok(ServerChange::Unknown) => {
                            debug!(scope = %scope_label, "skipping unrecognized change type");
                        }
                        Ok(change) => {
                            let sender = forward.lock().await;
                            if sender
                                .send(ScopedChange {
                                    scope: scope.clone(),
                                    change,
                                })
                                .is_err()
                            {
                                // Consumer is gone; nothing left to feed.
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(
                                scope = %scope_label,
                                error = %err,
                                "dropping malformed change payload"
                            );
                        }
                    }
                }
                None => {
                    dead.store(true, Ordering::SeqCst);
                    let _ = status.send(ChannelStatus::Lost(scope_label.clone()));
                    break;
                }
            },
            _ = stop.changed() => break,
        }
    }
    dead.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use dashmap::DashMap;
    use futures::future::BoxFuture;
    use tokio::sync::broadcast;
    use tokio_stream::wrappers::BroadcastStream;
    use uuid::Uuid;

    use super::*;
    use crate::backend::RawEvent;

    /// Broadcast-backed stub transport publishing to named scopes.
    struct StubRealtime {
        hub: DashMap<String, broadcast::Sender<RawEvent>>,
    }

    impl StubRealtime {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                hub: DashMap::new(),
            })
        }

        fn publish(&self, scope: &str, payload: &str) {
            let sender = self
                .hub
                .entry(scope.to_string())
                .or_insert_with(|| broadcast::channel(16).0);
            let _ = sender.send(RawEvent {
                scope: scope.to_string(),
                payload: payload.to_string(),
            });
        }
    }

    impl RealtimeTransport for StubRealtime {
        fn open(&self, scope: &ScopeKey) -> BoxFuture<'static, TransportResult<EventStream>> {
            let receiver = self
                .hub
                .entry(scope.to_string())
                .or_insert_with(|| broadcast::channel(16).0)
                .subscribe();
            Box::pin(async move {
                let stream = BroadcastStream::new(receiver)
                    .filter_map(|result| async move { result.ok() })
                    .boxed();
                Ok(stream)
            })
        }
    }

    fn cleared(seq: u64) -> String {
        format!(r#"{{"type":"buzzers_cleared","seq":{seq}}}"#)
    }

    #[tokio::test]
    async fn events_are_decoded_and_forwarded_in_order() {
        let transport = StubRealtime::new();
        let service = SubscriptionService::new(transport.clone());
        let scope = ScopeKey::session(Uuid::new_v4());
        let (tx, mut rx) = mpsc::unbounded_channel();

        service.subscribe(scope.clone(), tx).await.expect("subscribe");
        transport.publish(&scope.to_string(), &cleared(1));
        transport.publish(&scope.to_string(), &cleared(2));

        let first = rx.recv().await.expect("first change");
        let second = rx.recv().await.expect("second change");
        assert_eq!(first.change.seq(), Some(1));
        assert_eq!(second.change.seq(), Some(2));
        assert_eq!(first.scope, scope);
    }

    #[tokio::test]
    async fn malformed_payloads_are_dropped_not_forwarded() {
        let transport = StubRealtime::new();
        let service = SubscriptionService::new(transport.clone());
        let scope = ScopeKey::session(Uuid::new_v4());
        let (tx, mut rx) = mpsc::unbounded_channel();

        service.subscribe(scope.clone(), tx).await.expect("subscribe");
        transport.publish(&scope.to_string(), "{broken");
        transport.publish(&scope.to_string(), &cleared(3));

        let delivered = rx.recv().await.expect("valid change still flows");
        assert_eq!(delivered.change.seq(), Some(3));
    }

    #[tokio::test]
    async fn switching_scopes_stops_delivery_from_the_old_scope() {
        let transport = StubRealtime::new();
        let service = SubscriptionService::new(transport.clone());
        let session_id = Uuid::new_v4();
        let scope_a = ScopeKey::session(session_id);
        let scope_b = ScopeKey::clue(session_id, Uuid::new_v4());
        let (tx, mut rx) = mpsc::unbounded_channel();

        service
            .subscribe(scope_a.clone(), tx.clone())
            .await
            .expect("subscribe A");
        service
            .subscribe(scope_b.clone(), tx)
            .await
            .expect("subscribe B");
        assert_eq!(service.current_scope().await, Some(scope_b.clone()));

        // A late event from the old scope must not reach the consumer.
        transport.publish(&scope_a.to_string(), &cleared(9));
        transport.publish(&scope_b.to_string(), &cleared(10));

        let delivered = rx.recv().await.expect("only B delivers");
        assert_eq!(delivered.scope, scope_b);
        assert_eq!(delivered.change.seq(), Some(10));
        assert!(rx.try_recv().is_err(), "no stale delivery from A");
    }

    #[tokio::test]
    async fn resubscribing_to_the_same_scope_replaces_the_handler() {
        let transport = StubRealtime::new();
        let service = SubscriptionService::new(transport.clone());
        let scope = ScopeKey::session(Uuid::new_v4());
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        service
            .subscribe(scope.clone(), old_tx)
            .await
            .expect("subscribe");
        service
            .subscribe(scope.clone(), new_tx)
            .await
            .expect("resubscribe");

        transport.publish(&scope.to_string(), &cleared(4));

        let delivered = new_rx.recv().await.expect("new handler receives");
        assert_eq!(delivered.change.seq(), Some(4));
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_safe_when_idle_and_reports_status() {
        let transport = StubRealtime::new();
        let service = SubscriptionService::new(transport);
        let mut status = service.status_watcher();

        service.unsubscribe().await;
        service.unsubscribe().await;
        assert_eq!(*status.borrow_and_update(), ChannelStatus::Idle);
    }
}
