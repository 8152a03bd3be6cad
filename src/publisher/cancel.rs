//! Cooperative cancellation shared between the CLI and the publisher

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cloneable one-shot cancellation flag
///
/// Every clone observes the same flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of the token, so this only
        // errors if every token is gone, in which case nothing can cancel
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration`, returning false if cancelled first
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
