//! OS notification bridge
//!
//! Wraps the `notify` crate's recommended watcher (inotify on Linux) and
//! converts its raw events into stamped [`LocalEvent`]s. Paths outside
//! the watched root, ignored names and temp files are dropped here so the
//! watcher loop only ever sees events worth handling.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use pairsync_core::domain::newtypes::NodePath;
use pairsync_core::ports::local_filesystem::ILocalFileSystem;

use crate::events::{EventSequencer, LocalEvent};
use crate::WatcherError;

/// Bridges the OS watcher to the sequenced event channel.
///
/// Dropping the notifier stops the underlying watch.
pub struct Notifier {
    watcher: RecommendedWatcher,
}

impl Notifier {
    /// Creates the notifier and starts watching the accessor's root
    /// recursively. Events flow through `sequencer` as they arrive.
    pub fn start(
        fs: Arc<dyn ILocalFileSystem>,
        sequencer: EventSequencer,
    ) -> Result<Self> {
        let root = fs.base_folder().to_path_buf();
        if !root.is_dir() {
            return Err(WatcherError::RootUnavailable(root).into());
        }
        info!(root = %root.display(), "starting filesystem notifier");

        let callback_fs = Arc::clone(&fs);
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(local) = map_notify_event(callback_fs.as_ref(), &event) {
                        if !sequencer.emit(local) {
                            warn!("event receiver dropped, discarding event");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "filesystem notifier error");
                }
            },
            notify::Config::default(),
        )
        .map_err(WatcherError::Notifier)?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(WatcherError::Notifier)?;

        Ok(Self { watcher })
    }

    /// Stops watching the root. Also happens implicitly on drop.
    pub fn stop(mut self, root: &Path) {
        if let Err(e) = self.watcher.unwatch(root) {
            debug!(error = %e, "unwatch on shutdown failed");
        }
    }
}

/// Relativizes one absolute path, dropping anything ignored or outside
/// the root.
fn relativize(fs: &dyn ILocalFileSystem, absolute: &Path) -> Option<NodePath> {
    let path = match fs.to_relative(absolute) {
        Ok(path) => path,
        Err(e) => {
            debug!(path = %absolute.display(), error = %e, "dropping out-of-root event");
            return None;
        }
    };
    if path.is_root() {
        return None;
    }
    let parent = path.parent().unwrap_or_else(NodePath::root);
    if fs.is_ignored(&parent, path.name()) {
        debug!(path = %path, "dropping event for ignored name");
        return None;
    }
    Some(path)
}

/// Converts a raw `notify::Event` into a [`LocalEvent`].
///
/// - `Create(*)` becomes `Created`
/// - `Modify(Data(*))` and other metadata modifies become `Modified`
/// - `Modify(Name(Both))` with two paths becomes `Moved`
/// - one-sided renames degrade to `Created` / `Deleted`
/// - `Remove(*)` becomes `Deleted`
///
/// Returns `None` for access events and anything filtered by
/// [`relativize`].
fn map_notify_event(fs: &dyn ILocalFileSystem, event: &notify::Event) -> Option<LocalEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => {
            let path = relativize(fs, paths.first()?)?;
            Some(LocalEvent::Created(path))
        }

        EventKind::Remove(_) => {
            let path = relativize(fs, paths.first()?)?;
            Some(LocalEvent::Deleted(path))
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                // A rename into or out of ignored territory is one-sided
                // from the tree's point of view.
                let src = relativize(fs, &paths[0]);
                let dst = relativize(fs, &paths[1]);
                match (src, dst) {
                    (Some(src), Some(dst)) => Some(LocalEvent::Moved { src, dst }),
                    (Some(src), None) => Some(LocalEvent::Deleted(src)),
                    (None, Some(dst)) => Some(LocalEvent::Created(dst)),
                    (None, None) => None,
                }
            } else {
                let path = relativize(fs, paths.first()?)?;
                Some(LocalEvent::Modified(path))
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            let path = relativize(fs, paths.first()?)?;
            Some(LocalEvent::Deleted(path))
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            let path = relativize(fs, paths.first()?)?;
            Some(LocalEvent::Created(path))
        }

        EventKind::Modify(_) => {
            let path = relativize(fs, paths.first()?)?;
            Some(LocalEvent::Modified(path))
        }

        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use notify::event::{CreateKind, DataChange, RemoveKind};

    use crate::filesystem::LocalFileSystemAccessor;

    use super::*;

    fn raw(kind: EventKind, paths: Vec<PathBuf>) -> notify::Event {
        notify::Event {
            kind,
            paths,
            attrs: Default::default(),
        }
    }

    fn accessor() -> LocalFileSystemAccessor {
        LocalFileSystemAccessor::new("/watch")
    }

    #[test]
    fn test_create_and_remove_mapping() {
        let fs = accessor();

        let ev = map_notify_event(
            &fs,
            &raw(EventKind::Create(CreateKind::File), vec!["/watch/a.txt".into()]),
        )
        .unwrap();
        assert_eq!(ev, LocalEvent::Created(NodePath::new("/a.txt").unwrap()));

        let ev = map_notify_event(
            &fs,
            &raw(EventKind::Remove(RemoveKind::File), vec!["/watch/a.txt".into()]),
        )
        .unwrap();
        assert_eq!(ev, LocalEvent::Deleted(NodePath::new("/a.txt").unwrap()));
    }

    #[test]
    fn test_rename_both_maps_to_moved() {
        let fs = accessor();
        let ev = map_notify_event(
            &fs,
            &raw(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                vec!["/watch/a.txt".into(), "/watch/dir/b.txt".into()],
            ),
        )
        .unwrap();
        assert_eq!(
            ev,
            LocalEvent::Moved {
                src: NodePath::new("/a.txt").unwrap(),
                dst: NodePath::new("/dir/b.txt").unwrap(),
            }
        );
    }

    #[test]
    fn test_rename_into_ignored_is_deletion() {
        let fs = accessor();
        let ev = map_notify_event(
            &fs,
            &raw(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                vec!["/watch/a.txt".into(), "/watch/.a.txt.swp".into()],
            ),
        )
        .unwrap();
        assert_eq!(ev, LocalEvent::Deleted(NodePath::new("/a.txt").unwrap()));
    }

    #[test]
    fn test_out_of_root_and_ignored_are_dropped() {
        let fs = accessor();

        assert!(map_notify_event(
            &fs,
            &raw(EventKind::Create(CreateKind::File), vec!["/elsewhere/x".into()])
        )
        .is_none());
        assert!(map_notify_event(
            &fs,
            &raw(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                vec!["/watch/.hidden".into()]
            )
        )
        .is_none());
    }
}
