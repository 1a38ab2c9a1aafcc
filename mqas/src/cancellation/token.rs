//! Cancellation token for cooperative cancellation.

use parking_lot::RwLock;
use tokio::sync::watch;

/// A token for cooperative cancellation that tasks can await.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
#[derive(Debug)]
pub struct CancellationToken {
    /// Flips to `true` once, on the first cancellation.
    state: watch::Sender<bool>,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self {
            state: watch::Sender::new(false),
            reason: RwLock::new(None),
        }
    }
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// Wakes every task waiting in [`CancellationToken::cancelled`].
    pub fn cancel(&self, reason: impl Into<String>) {
        let first = self.state.send_if_modified(|cancelled| {
            let changed = !*cancelled;
            *cancelled = true;
            changed
        });
        if first {
            *self.reason.write() = Some(reason.into());
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
