//! Suppression of self-inflicted filesystem events
//!
//! When a transfer worker applies a remote operation locally (writes a
//! downloaded file, renames, deletes), the OS notifier reports that change
//! right back. Without suppression the local watcher would mark the pair
//! locally modified and ping-pong it to the server.
//!
//! The set is owned by the engine side and shared with the local watcher:
//! workers [`expect`](SuppressionSet::expect) a path before touching it,
//! and the watcher [`consume`](SuppressionSet::consume)s the entry when
//! the matching event arrives. Each entry suppresses exactly one event.

use dashmap::DashSet;

use pairsync_core::domain::newtypes::NodePath;

/// Shared set of paths whose next local event is self-inflicted.
#[derive(Debug, Default)]
pub struct SuppressionSet {
    paths: DashSet<NodePath>,
}

impl SuppressionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a path about to be touched by a transfer worker.
    pub fn expect(&self, path: NodePath) {
        tracing::trace!(path = %path, "expecting self-inflicted event");
        self.paths.insert(path);
    }

    /// Atomically checks for and removes an entry. Returns true when the
    /// event for `path` should be dropped. A second event for the same
    /// path is not suppressed unless re-registered.
    pub fn consume(&self, path: &NodePath) -> bool {
        let hit = self.paths.remove(path).is_some();
        if hit {
            tracing::debug!(path = %path, "suppressed self-inflicted event");
        }
        hit
    }

    /// Number of outstanding expectations.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
