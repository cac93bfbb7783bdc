//! Cancellation context for blocking establishment steps
//!
//! A [`CancelContext`] carries an optional deadline and a cancellation signal.
//! Establishers race their blocking waits (candidate gathering) against
//! [`CancelContext::done`]; whichever finishes first wins.

use crate::Error;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline plus cancellation signal
#[derive(Debug, Clone)]
pub struct CancelContext {
    cancelled: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Cancels every [`CancelContext`] derived from the same `new()` call
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelContext {
    /// Create a cancellable context and the handle that cancels it
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancelled: rx,
                deadline: None,
            },
            CancelHandle { tx },
        )
    }

    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        let (ctx, _handle) = Self::new();
        ctx
    }

    /// Derive a context whose deadline is at most `timeout` from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether cancellation has already been requested or the deadline passed
    pub fn is_done(&self) -> bool {
        *self.cancelled.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolve once the context is cancelled or its deadline passes.
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    pub async fn done(&self) -> Error {
        let mut rx = self.cancelled.clone();
        let cancelled = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Handle dropped without cancelling: never fires
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = cancelled => Error::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
            None => {
                cancelled.await;
                Error::Cancelled
            }
        }
    }
}

impl Default for CancelContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CancelHandle {
    /// Cancel all contexts sharing this handle
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}
