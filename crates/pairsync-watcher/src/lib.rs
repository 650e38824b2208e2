//! Change detection for the sync engine
//!
//! Two watchers feed the pair-state store with half-state updates:
//!
//! - [`LocalChangeWatcher`] scans the watched directory once at startup,
//!   then consumes sequenced filesystem events from the OS notifier.
//! - [`RemoteChangeWatcher`] scans the remote tree once at startup, then
//!   polls the server's change summary API on an interval.
//!
//! Neither watcher transfers any content. They only record what changed
//! on each side; the transfer workers consume the resulting queue.
//!
//! ## Architecture
//!
//! ```text
//! inotify ──→ Notifier ──→ SequencedEvent channel ──→ LocalChangeWatcher ──┐
//!                                                                          │
//!                                                        IPairStateStore ◄─┤
//!                                                                          │
//! change summary API ◄──── poll ◄──────────── RemoteChangeWatcher ─────────┘
//! ```

pub mod events;
pub mod filesystem;
pub mod local;
pub mod notifier;
pub mod remote;
pub mod supervisor;
pub mod suppression;

pub use events::{EventSequencer, LocalEvent, SequencedEvent};
pub use filesystem::LocalFileSystemAccessor;
pub use local::{LocalChangeWatcher, LocalWatcherMetrics};
pub use notifier::Notifier;
pub use remote::{RemoteChangeWatcher, RemoteWatcherMetrics};
pub use supervisor::WatcherSupervisor;
pub use suppression::SuppressionSet;

/// Errors raised by the watcher layer.
///
/// Most per-unit failures (one file, one remote change entry) are logged
/// and skipped rather than surfaced here; these variants cover conditions
/// that abort a whole watcher.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("watched root is not accessible: {0}")]
    RootUnavailable(std::path::PathBuf),

    #[error("filesystem notifier failed: {0}")]
    Notifier(#[from] notify::Error),
}
