//! Cooperative cancellation for long-running operations.
//!
//! Arm polling, monitoring and log streaming check the token at every
//! suspension point and unwind through their normal cleanup paths (a
//! cancelled arm still destroys its control session).

use tokio::sync::watch;

/// Fires the paired [`CancelToken`]s.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    /// Signal cancellation to every paired token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that never fires.
    #[must_use]
    pub fn none() -> Self {
        Self { rx: None }
    }

    /// Whether cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once cancellation is signalled; never for [`Self::none`].
    pub async fn cancelled(&mut self) {
        match &mut self.rx {
            None => std::future::pending().await,
            Some(rx) => {
                while !*rx.borrow_and_update() {
                    if rx.changed().await.is_err() {
                        // Canceller dropped without firing: stay pending
                        std::future::pending::<()>().await;
                    }
                }
            },
        }
    }
}

/// A connected canceller/token pair.
#[must_use]
pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelToken { rx: Some(rx) })
}
