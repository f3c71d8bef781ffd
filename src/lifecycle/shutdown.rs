//! Shutdown coordination.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// The HTTP server, the admin API and the config watcher each hold a
/// receiver; one trigger stops them all.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Returns false if it was already triggered.
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::info!(subscribers = self.tx.receiver_count(), "Shutdown triggered");
        let _ = self.tx.send(());
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_every_subscriber_once() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert!(shutdown.is_triggered());

        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
        assert!(a.try_recv().is_err());
    }
}
