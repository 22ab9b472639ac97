//! Cancellation for commands started on behalf of a view.

use std::{future::Future, sync::Arc};

use tokio::sync::watch;

use crate::error::CommandError;

/// Cloneable handle a view keeps while it is mounted. Cancelling it rejects
/// every command still running under it; none of them touches the store.
#[derive(Clone)]
pub struct ViewScope {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ViewScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewScope {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Drives `command` until it settles or the scope is cancelled, whichever
    /// comes first. A cancelled command future is dropped before it applies.
    pub async fn run<T, F>(&self, command: F) -> Result<T, CommandError>
    where
        F: Future<Output = Result<T, CommandError>>,
    {
        let mut rx = self.tx.subscribe();
        if *rx.borrow_and_update() {
            return Err(CommandError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = rx.wait_for(|cancelled| *cancelled) => Err(CommandError::Cancelled),
            result = command => result,
        }
    }
}
