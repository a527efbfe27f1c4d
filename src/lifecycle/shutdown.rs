//! Shutdown coordination.

use std::sync::Arc;

use tokio::sync::watch;

/// Latched shutdown signal.
///
/// `wait` also observes a trigger that happened before the call.
#[derive(Debug, Clone)]
pub struct Shutdown {
    fired: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            fired: Arc::new(fired),
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.fired.send_replace(true);
    }

    /// Resolve once shutdown is triggered, including before the call.
    pub async fn wait(&self) {
        let mut rx = self.fired.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
