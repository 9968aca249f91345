//! Registry of interpreter subprocesses spawned by the broker

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
struct TrackedProcess {
    label: String,
    cancel: CancellationToken,
}

/// Tracks running subprocesses so `stop` and shutdown can terminate them.
///
/// Each entry holds the kill signal for one child. The executor registers an
/// entry immediately before spawning and unregisters it once the child has
/// exited; terminating an entry trips its signal and the executor kills the
/// child.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<Uuid, TrackedProcess>>>,
}

impl ProcessRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new process. Returns its id and the signal that kills it.
    pub fn register(&self, label: impl Into<String>) -> (Uuid, CancellationToken) {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.inner.lock().insert(
            id,
            TrackedProcess {
                label: label.into(),
                cancel: cancel.clone(),
            },
        );
        (id, cancel)
    }

    /// Stop tracking a process
    pub fn unregister(&self, id: &Uuid) {
        self.inner.lock().remove(id);
    }

    /// Number of tracked processes
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Signal every tracked process and clear the registry.
    ///
    /// Returns how many entries were removed. Entries whose signal already
    /// fired are removed without being signalled again.
    pub fn terminate_all(&self) -> usize {
        let drained: Vec<(Uuid, TrackedProcess)> = self.inner.lock().drain().collect();
        for (id, process) in &drained {
            if process.cancel.is_cancelled() {
                continue;
            }
            debug!(process_id = %id, label = %process.label, "terminating process");
            process.cancel.cancel();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "terminated tracked processes");
        }
        drained.len()
    }
}
