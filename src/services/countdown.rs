use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// One-shot countdown used for the final-round answer window.
///
/// The expiry action fires exactly once, and never fires after
/// [`Countdown::cancel`]: the expiry path and the cancel path race through a
/// single `select`, so there is no window where both run.
pub struct Countdown {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Countdown {
    /// Start a countdown that runs `on_expiry` when `duration` elapses.
    pub fn start<F, Fut>(duration: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = sleep(duration) => on_expiry().await,
                _ = cancel_rx.changed() => {}
            }
        });
        Self {
            cancel: cancel_tx,
            task,
        }
    }

    /// Cancel the countdown; the expiry action will not run.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Whether the countdown already fired or was cancelled.
    pub fn finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_exactly_once_on_expiry() {
        let fired = Arc::new(AtomicU32::new(0));
        let observer = fired.clone();
        let countdown = Countdown::start(Duration::from_secs(30), move || async move {
            observer.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(countdown.finished());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_expiry_suppresses_the_action() {
        let fired = Arc::new(AtomicU32::new(0));
        let observer = fired.clone();
        let countdown = Countdown::start(Duration::from_secs(30), move || async move {
            observer.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        countdown.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
