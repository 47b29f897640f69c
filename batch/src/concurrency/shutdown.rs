//! Broadcast shutdown signal.
//!
//! A [`ShutdownTx`] is held by whoever may stop the run (the Ctrl-C handler of the binary, tests),
//! while every producer and export worker holds a [`ShutdownRx`] and checks it between rows.

use tokio::sync::watch;

/// Sending side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to all receivers.
    ///
    /// Returns an error if every receiver is gone, which callers usually ignore.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<bool>> {
        self.0.send(true)
    }

    /// Creates a new receiver.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns whether shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is requested.
    ///
    /// Never returns if the sender is dropped without signaling.
    pub async fn wait_for_shutdown(&mut self) {
        if self.0.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a shutdown channel in the running state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
