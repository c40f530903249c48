//! A minimal cancellation signal for in-flight plugin sync-in/sync-out.
//!
//! Modelled after the teacher's pattern of handing out `Arc`-backed
//! handles that a caller can hold onto and signal independently of the
//! task awaiting them, rather than pulling in `tokio-util`'s
//! `CancellationToken` for what is, here, a single fire-once signal.
//! Backed by `watch` rather than `Notify` so a `cancel()` that races
//! ahead of the first `.cancelled().await` is never missed.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancelSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called, including if it already
    /// was before this call.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
