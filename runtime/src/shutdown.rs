//! Cooperative shutdown signal.
//!
//! Shutdown is cooperative: stop accepting new deliveries, let in-flight
//! handlers finish, then close consumers and the bus client. [`Shutdown`] is
//! the trigger side held by the binary; [`ShutdownSignal`] is the cheap
//! clone consumers poll between deliveries.

use tokio::sync::watch;

/// Trigger side of the shutdown signal.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Listener side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a new, untriggered shutdown pair.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A listener for this shutdown.
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown; all listeners observe it.
    pub fn trigger(&self) {
        // Send only fails when no listener exists, which is fine.
        let _ = self.tx.send(true);
        tracing::info!("shutdown triggered");
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Whether shutdown has been triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is triggered.
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Trigger side dropped; treat as shutdown.
                return;
            }
        }
    }
}
