//! Registry of live pipeline process groups.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Shared registry of the process groups spawned by running pipelines.
///
/// Every pipeline puts all of its stages into one process group and registers
/// that group here for as long as any stage may still be alive. The entry is
/// removed when the returned [`TrackedGroup`] is dropped, which happens only
/// after every stage has been reaped.
#[derive(Debug, Default)]
pub struct ProcessTracker {
    groups: Mutex<BTreeMap<u32, String>>,
}

impl ProcessTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live process group. The group stays registered until the
    /// guard is dropped.
    pub fn register(self: &Arc<Self>, pgid: u32, label: impl Into<String>) -> TrackedGroup {
        let label = label.into();
        debug!(pgid, "tracking process group: {}", label);
        self.groups.lock().insert(pgid, label);
        TrackedGroup {
            tracker: Arc::clone(self),
            pgid,
        }
    }

    /// Process group ids that are currently registered.
    pub fn live_groups(&self) -> Vec<u32> {
        self.groups.lock().keys().copied().collect()
    }

    /// Number of registered process groups.
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    /// Whether no process group is registered.
    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }
}

/// Registration handle for one pipeline's process group.
#[derive(Debug)]
pub struct TrackedGroup {
    tracker: Arc<ProcessTracker>,
    pgid: u32,
}

impl TrackedGroup {
    /// The tracked process group id.
    pub fn pgid(&self) -> u32 {
        self.pgid
    }
}

impl Drop for TrackedGroup {
    fn drop(&mut self) {
        self.tracker.groups.lock().remove(&self.pgid);
    }
}
