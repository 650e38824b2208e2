//! Local filesystem port (driven/secondary port)
//!
//! The local watcher never touches `std::fs` directly; everything goes
//! through this trait so tests can run against a real temp directory via
//! the adapter in `pairsync-watcher` or against a fixture.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::domain::newtypes::NodePath;

/// Metadata snapshot of one local file or directory.
///
/// Digests are intentionally not part of the snapshot: they are expensive
/// and computed on demand through
/// [`ILocalFileSystem::compute_digest`] only when the watcher has already
/// decided the entry changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInfo {
    /// Path relative to the watched root.
    pub path: NodePath,
    /// True for directories.
    pub folderish: bool,
    /// Filesystem modification time.
    pub last_modified: DateTime<Utc>,
    /// Size in bytes; zero for directories.
    pub size: u64,
}

impl LocalInfo {
    /// Final name component.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.name()
    }

    /// The second-granularity comparison token used by full scans.
    ///
    /// Stored verbatim on the pair as `last_local_updated`; an exact string
    /// match means "unchanged". Formatting both sides through the same
    /// pattern avoids sub-second and timezone noise.
    #[must_use]
    pub fn mtime_key(&self) -> String {
        self.last_modified.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Port trait for local filesystem access.
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Absolute path of the watched root directory.
    fn base_folder(&self) -> &Path;

    /// Metadata for one entry; `None` if it does not exist.
    async fn get_info(&self, path: &NodePath) -> anyhow::Result<Option<LocalInfo>>;

    /// Children of a directory, sorted by name.
    ///
    /// Returns `None` when the directory itself is gone, so a scan can end
    /// that branch silently instead of failing the whole walk.
    async fn get_children_info(&self, path: &NodePath) -> anyhow::Result<Option<Vec<LocalInfo>>>;

    /// Content digest of a file (never called on directories).
    async fn compute_digest(&self, path: &NodePath) -> anyhow::Result<String>;

    /// Whether `name` under `parent` is excluded from synchronization
    /// (dotfiles, lock/swap/backup files).
    fn is_ignored(&self, parent: &NodePath, name: &str) -> bool;

    /// Whether `name` is a transient temp file (editor temp or the
    /// download-temp suffix used by transfer workers).
    fn is_temp_file(&self, name: &str) -> bool;

    /// Converts an absolute path delivered by the OS notifier into a tree
    /// path relative to the watched root. The root maps to `/`.
    fn to_relative(&self, absolute: &Path) -> anyhow::Result<NodePath>;
}
