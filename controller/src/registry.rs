use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// The latest endpoint snapshot, shared between one writer and any number
/// of readers. Writers install a brand-new snapshot and readers clone the
/// `Arc`, so a reader can never observe a partially replaced sequence.
///
/// The worker client reuses this cell for its local view of the registry.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    snapshot: Arc<RwLock<Arc<[String]>>>,
}

impl Registry {
    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<[String]> {
        self.snapshot.read().clone()
    }

    /// Replaces the snapshot wholesale.
    pub fn store(&self, services: Vec<String>) {
        *self.snapshot.write() = services.into();
    }
}

/// Installs each snapshot from the reconcile handoff until the channel
/// closes or the task is cancelled.
pub async fn consume(registry: Registry, mut snapshots: mpsc::Receiver<Vec<String>>) {
    while let Some(services) = snapshots.recv().await {
        tracing::info!(services = services.len(), "updating registry");
        registry.store(services);
    }
    tracing::debug!("snapshot stream ended");
}
