//! Run cancellation plumbing.
//!
//! A rollout run observes cancellation only at suspension points, between
//! poll ticks. Once observed, no further provider call is issued; resources
//! already created stay up for inspection.

use tokio::sync::watch;

/// Sending half: signals cancellation to every token cloned from the pair.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving half: cheap to clone, observed between poll ticks.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is signalled. If the [`Canceller`] has
    /// been dropped without cancelling, this pends forever.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected canceller/token pair for one run.
pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelToken { rx })
}
