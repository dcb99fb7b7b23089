// Shutdown channel for graceful termination of background tasks

use tokio::sync::watch;

/// Shutdown sender. Owned by the queue group; signalling it cancels the
/// pruner loop and bounds any in-flight runner close.
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to every token derived from this sender.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Derive a fresh token observing this sender.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Shutdown signal observer
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the shutdown signal. Returns immediately if it already fired.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
