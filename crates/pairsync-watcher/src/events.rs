//! Sequenced local event channel
//!
//! Raw OS events are stamped with a monotonically increasing sequence
//! number at the moment the producer observes them, then pushed through
//! an unbounded channel. The consumer drains whatever is available each
//! tick and sorts by stamp before applying, so events are always handled
//! in observation order even if the channel ever reorders them.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use unicode_normalization::UnicodeNormalization;

use pairsync_core::domain::newtypes::NodePath;

/// A filesystem change observed under the watched root, with paths
/// already relative and normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Created(NodePath),
    Modified(NodePath),
    Deleted(NodePath),
    Moved { src: NodePath, dst: NodePath },
}

impl LocalEvent {
    /// The path this event is about. For moves, the destination.
    pub fn path(&self) -> &NodePath {
        match self {
            LocalEvent::Created(p) | LocalEvent::Modified(p) | LocalEvent::Deleted(p) => p,
            LocalEvent::Moved { dst, .. } => dst,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LocalEvent::Created(_) => "created",
            LocalEvent::Modified(_) => "modified",
            LocalEvent::Deleted(_) => "deleted",
            LocalEvent::Moved { .. } => "moved",
        }
    }
}

/// A [`LocalEvent`] plus its producer-side stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: LocalEvent,
}

/// Producer end of the event pipeline. Stamps and sends.
///
/// Cloneable so the notifier callback can hold one while tests hold
/// another; the stamp counter is shared.
#[derive(Clone)]
pub struct EventSequencer {
    counter: std::sync::Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<SequencedEvent>,
}

impl EventSequencer {
    /// Creates the sequencer and the receiver the local watcher drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SequencedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                counter: std::sync::Arc::new(AtomicU64::new(0)),
                tx,
            },
            rx,
        )
    }

    /// Stamps and sends one event. Returns false if the consumer is gone.
    pub fn emit(&self, event: LocalEvent) -> bool {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(seq, kind = event.kind(), path = %event.path(), "event stamped");
        self.tx.send(SequencedEvent { seq, event }).is_ok()
    }
}

/// Drains every event currently buffered in the channel and returns them
/// sorted by stamp. Does not wait for more.
pub fn drain_sorted(rx: &mut mpsc::UnboundedReceiver<SequencedEvent>) -> Vec<SequencedEvent> {
    let mut batch = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        batch.push(ev);
    }
    batch.sort_by_key(|e| e.seq);
    batch
}

/// NFC-normalizes a file name so that a name written in decomposed form
/// (as macOS volumes report it) compares equal to its composed form.
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect()
}
