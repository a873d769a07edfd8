//! Cooperative cancellation for in-flight calls.
//!
//! A [`CancelHandle`] is held by whoever may abort the call; the matching
//! [`CancelSignal`] travels with the call and is checked around every
//! attempt and every backoff sleep. A cancelled call never writes to the
//! cache.

use std::sync::Arc;

use tokio::sync::watch;

/// Triggers cancellation of every call holding the paired signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns `true` once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Observed by a call to learn that it should stop.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    /// Returns `true` if the paired handle has cancelled. Never `true` for
    /// [`Self::never`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.receiver.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested.
    ///
    /// Pends forever if the signal can no longer fire.
    pub async fn cancelled(&self) {
        let Some(receiver) = &self.receiver else {
            return std::future::pending().await;
        };
        let mut receiver = receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a connected handle/signal pair.
///
/// # Examples
///
/// ```
/// use contribmatch_github::cancel_pair;
///
/// let (handle, signal) = cancel_pair();
/// assert!(!signal.is_cancelled());
/// handle.cancel();
/// assert!(signal.is_cancelled());
/// ```
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        CancelHandle {
            sender: Arc::new(sender),
        },
        CancelSignal {
            receiver: Some(receiver),
        },
    )
}
