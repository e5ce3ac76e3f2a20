//! Cooperative shutdown signal shared by every long-running task.
//!
//! A `watch` channel carries a single "stop now" bit; tasks either poll
//! [`Shutdown::is_cancelled`] between units of work or `select!` on
//! [`Shutdown::cancelled`] while sleeping or waiting on I/O.

use tokio::sync::watch;

/// Create a linked (handle, signal) pair.
pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// Owning side; triggering it cancels every subscribed [`Shutdown`].
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Cloneable receiving side handed to tasks.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. A dropped handle counts as a
    /// shutdown so orphaned tasks do not wait forever.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
