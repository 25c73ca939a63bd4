use tokio::sync::watch;

/// Create a linked shutdown handle/token pair.
///
/// The token is polled cooperatively: a worker or maintenance loop checks it
/// between iterations and never aborts work mid-handler. How a shutdown gets
/// requested (an OS signal, a supervisor, a test) is the caller's concern;
/// the loops stay unaware of signal mechanics.
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownToken { rx })
}

/// Requests a graceful shutdown of every loop holding a linked token
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Request shutdown. Loops finish their current job before stopping.
    pub fn request(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation token checked at loop-iteration boundaries.
///
/// Dropping the last [`ShutdownHandle`] counts as a shutdown request, so an
/// orphaned loop winds down instead of running forever.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check whether shutdown has been requested
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until shutdown is requested
    pub async fn requested(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle dropped
                return;
            }
        }
    }
}
