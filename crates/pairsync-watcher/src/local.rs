//! Local change watcher
//!
//! Reconciles the watched directory against the pair-state store. One
//! initial full scan brings the store in line with the disk, then the
//! live loop drains sequenced notifier events once per tick and applies
//! them in stamp order.
//!
//! Half-state writes here touch only the local side of a pair; the
//! remote watcher owns the other half.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use pairsync_core::domain::cursor::KEY_LOCAL_LAST_FULL_SCAN;
use pairsync_core::domain::newtypes::NodePath;
use pairsync_core::domain::pair::{DocPair, HalfState};
use pairsync_core::ports::local_filesystem::{ILocalFileSystem, LocalInfo};
use pairsync_core::ports::state_store::IPairStateStore;

use crate::events::{drain_sorted, LocalEvent, SequencedEvent};
use crate::suppression::SuppressionSet;

// ============================================================================
// Metrics
// ============================================================================

/// Shared counters exposed to orchestration. All loads are relaxed; the
/// numbers are informational.
#[derive(Debug, Default)]
pub struct LocalWatcherMetrics {
    new_files: AtomicU64,
    update_files: AtomicU64,
    delete_files: AtomicU64,
    events_handled: AtomicU64,
    events_suppressed: AtomicU64,
    last_scan_duration_ms: AtomicU64,
}

impl LocalWatcherMetrics {
    pub fn new_files(&self) -> u64 {
        self.new_files.load(Ordering::Relaxed)
    }
    pub fn update_files(&self) -> u64 {
        self.update_files.load(Ordering::Relaxed)
    }
    pub fn delete_files(&self) -> u64 {
        self.delete_files.load(Ordering::Relaxed)
    }
    pub fn events_handled(&self) -> u64 {
        self.events_handled.load(Ordering::Relaxed)
    }
    pub fn events_suppressed(&self) -> u64 {
        self.events_suppressed.load(Ordering::Relaxed)
    }
    pub fn last_scan_duration_ms(&self) -> u64 {
        self.last_scan_duration_ms.load(Ordering::Relaxed)
    }
}

// ============================================================================
// LocalChangeWatcher
// ============================================================================

/// Watches the local side of the tree.
pub struct LocalChangeWatcher {
    fs: Arc<dyn ILocalFileSystem>,
    store: Arc<dyn IPairStateStore>,
    suppression: Arc<SuppressionSet>,
    metrics: Arc<LocalWatcherMetrics>,
    scan_done: watch::Sender<bool>,
    tick: std::time::Duration,
}

impl LocalChangeWatcher {
    pub fn new(
        fs: Arc<dyn ILocalFileSystem>,
        store: Arc<dyn IPairStateStore>,
        suppression: Arc<SuppressionSet>,
        tick_secs: u64,
    ) -> Self {
        let (scan_done, _) = watch::channel(false);
        Self {
            fs,
            store,
            suppression,
            metrics: Arc::new(LocalWatcherMetrics::default()),
            scan_done,
            tick: std::time::Duration::from_secs(tick_secs.max(1)),
        }
    }

    /// Flips to true once the initial full scan has committed.
    pub fn scan_finished(&self) -> watch::Receiver<bool> {
        self.scan_done.subscribe()
    }

    pub fn metrics(&self) -> Arc<LocalWatcherMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs the watcher until cancelled: full scan, then the event loop.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<SequencedEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.full_scan(&cancel).await?;
        let _ = self.scan_done.send(true);

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("local watcher stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let batch = drain_sorted(&mut events);
                    if batch.is_empty() {
                        continue;
                    }
                    debug!(events = batch.len(), "draining local event batch");
                    for ev in batch {
                        if cancel.is_cancelled() {
                            return Ok(());
                        }
                        if let Err(e) = self.handle_event(&ev).await {
                            warn!(seq = ev.seq, kind = ev.event.kind(),
                                  path = %ev.event.path(), error = %e,
                                  "dropping local event after error");
                        }
                    }
                    self.store.commit().await?;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Full scan
    // ------------------------------------------------------------------------

    /// Walks the whole watched tree, reconciling each directory level
    /// against the store. Commits per level, so an interrupted scan
    /// leaves a durable prefix.
    #[instrument(skip_all)]
    pub async fn full_scan(&self, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        info!(root = %self.fs.base_folder().display(), "local full scan starting");

        let mut stack = vec![NodePath::root()];
        while let Some(dir) = stack.pop() {
            if cancel.is_cancelled() {
                info!("local full scan interrupted");
                return Ok(());
            }
            if let Err(e) = self.scan_directory(&dir, &mut stack).await {
                warn!(dir = %dir, error = %e, "skipping directory after scan error");
            }
        }

        self.store
            .update_config(KEY_LOCAL_LAST_FULL_SCAN, Some(&Utc::now().to_rfc3339()))
            .await?;
        self.store.commit().await?;

        let elapsed = started.elapsed().as_millis() as u64;
        self.metrics
            .last_scan_duration_ms
            .store(elapsed, Ordering::Relaxed);
        info!(
            duration_ms = elapsed,
            new = self.metrics.new_files(),
            updated = self.metrics.update_files(),
            deleted = self.metrics.delete_files(),
            "local full scan finished"
        );
        Ok(())
    }

    /// Reconciles one directory by name-diffing disk children against
    /// stored children, then queues subdirectories on the work stack.
    async fn scan_directory(&self, dir: &NodePath, stack: &mut Vec<NodePath>) -> Result<()> {
        let Some(disk_children) = self.fs.get_children_info(dir).await? else {
            debug!(dir = %dir, "directory vanished mid-scan, ending branch");
            return Ok(());
        };

        let mut known: HashMap<String, DocPair> = HashMap::new();
        for pair in self.store.get_local_children(dir).await? {
            if let Some(name) = pair.local_name.clone() {
                known.insert(name, pair);
            }
        }

        let now = Utc::now();
        let mut seen: HashSet<String> = HashSet::new();
        for info in &disk_children {
            seen.insert(info.name().to_string());
            if info.folderish {
                stack.push(info.path.clone());
            }

            match known.get(info.name()) {
                Some(pair) => {
                    let mut pair = pair.clone();
                    if pair.unsynchronized || pair.is_owned(now) {
                        continue;
                    }
                    if let Err(e) = self.refresh_scanned_pair(&mut pair, info).await {
                        warn!(path = %info.path, error = %e, "skipping entry after refresh error");
                    }
                }
                None => {
                    if let Err(e) = self.insert_from_disk(info, dir).await {
                        warn!(path = %info.path, error = %e, "skipping entry after insert error");
                    }
                }
            }
        }

        for (name, pair) in known {
            if seen.contains(&name) {
                continue;
            }
            if pair.unsynchronized || pair.is_owned(now) {
                continue;
            }
            // A remote-only row carries its expected local placement
            // before the download ever runs; its absence on disk is not
            // a deletion.
            if pair.local_state == HalfState::Unknown {
                continue;
            }
            self.delete_pair_local(pair).await?;
        }

        self.store.commit().await?;
        Ok(())
    }

    /// Scan-path refresh of a known pair: unchanged mtime key and size
    /// mean untouched; otherwise folders get a metadata refresh and files
    /// a digest comparison deciding whether to queue. The size tiebreak
    /// catches edits landing within the mtime key's one-second grain.
    async fn refresh_scanned_pair(&self, pair: &mut DocPair, info: &LocalInfo) -> Result<()> {
        let unchanged = pair.last_local_updated.as_deref() == Some(info.mtime_key().as_str())
            && pair.local_size == info.size
            && pair.folderish == info.folderish;
        if unchanged {
            return Ok(());
        }

        if info.folderish {
            self.store.update_local_state(pair, info, false).await?;
            return Ok(());
        }

        let digest = self.fs.compute_digest(&info.path).await?;
        if pair.local_digest.as_deref() == Some(digest.as_str()) {
            // Content identical, only the timestamp moved.
            self.store.update_local_state(pair, info, false).await?;
        } else {
            pair.local_digest = Some(digest);
            if pair.local_state == HalfState::Synchronized {
                pair.local_state = HalfState::Modified;
            }
            self.store.update_local_state(pair, info, true).await?;
            self.metrics.update_files.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Inserts a freshly sighted entry, computing the digest for files.
    async fn insert_from_disk(&self, info: &LocalInfo, parent: &NodePath) -> Result<()> {
        let id = self.store.insert_local_state(info, parent).await?;
        self.metrics.new_files.fetch_add(1, Ordering::Relaxed);

        if !info.folderish {
            let digest = self.fs.compute_digest(&info.path).await?;
            if let Some(mut pair) = self.store.get_pair(id).await? {
                pair.local_digest = Some(digest);
                self.store.update_local_state(&mut pair, info, false).await?;
            }
        }
        debug!(path = %info.path, folderish = info.folderish, "pair inserted from disk");
        Ok(())
    }

    /// Marks a pair and, for folders, every stored descendant locally
    /// deleted. Rows that never matched remotely are removed outright.
    async fn delete_pair_local(&self, pair: DocPair) -> Result<()> {
        let mut stack = vec![pair];
        while let Some(mut pair) = stack.pop() {
            if pair.folderish {
                if let Some(path) = pair.local_path.clone() {
                    for child in self.store.get_local_children(&path).await? {
                        stack.push(child);
                    }
                }
            }
            self.metrics.delete_files.fetch_add(1, Ordering::Relaxed);
            if pair.remote_state == HalfState::Unknown {
                // Never matched remotely, nothing to propagate.
                self.store.remove_pair(&pair).await?;
            } else {
                self.store.delete_local_state(&mut pair).await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Live events
    // ------------------------------------------------------------------------

    /// Applies one sequenced event. Failures bubble to the loop, which
    /// logs and drops the event.
    pub async fn handle_event(&self, ev: &SequencedEvent) -> Result<()> {
        self.metrics.events_handled.fetch_add(1, Ordering::Relaxed);

        match &ev.event {
            LocalEvent::Deleted(path) => {
                if self.suppression.consume(path) {
                    self.metrics.events_suppressed.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                self.handle_deleted(path).await
            }
            LocalEvent::Moved { src, dst } => {
                if self.suppression.consume(dst) {
                    // A worker produced this destination itself; what
                    // remains to record is the appearance of the file.
                    self.metrics.events_suppressed.fetch_add(1, Ordering::Relaxed);
                    return self.handle_created(dst).await;
                }
                self.handle_moved(src, dst).await
            }
            LocalEvent::Created(path) => self.handle_created(path).await,
            LocalEvent::Modified(path) => self.handle_modified(path).await,
        }
    }

    async fn handle_created(&self, path: &NodePath) -> Result<()> {
        if self.store.get_pair_by_local_path(path).await?.is_some() {
            // Already tracked (download landing or duplicate event).
            // Boxed: created and modified fall back to each other.
            return Box::pin(self.handle_modified(path)).await;
        }

        let Some(info) = self.fs.get_info(path).await? else {
            debug!(path = %path, "created entry already gone");
            return Ok(());
        };
        let parent = path.parent().unwrap_or_else(NodePath::root);
        self.insert_from_disk(&info, &parent).await?;

        if info.folderish {
            // Files can land inside a new directory before the watch
            // registration covers it, so scan the subtree now.
            let mut stack = vec![path.clone()];
            while let Some(dir) = stack.pop() {
                if let Err(e) = self.scan_directory(&dir, &mut stack).await {
                    warn!(dir = %dir, error = %e, "skipping directory after scan error");
                }
            }
        }
        Ok(())
    }

    async fn handle_modified(&self, path: &NodePath) -> Result<()> {
        let Some(mut pair) = self.store.get_pair_by_local_path(path).await? else {
            return Box::pin(self.handle_created(path)).await;
        };
        if pair.unsynchronized || pair.is_owned(Utc::now()) {
            debug!(path = %path, pair = %pair.describe(), "skipping event on busy pair");
            return Ok(());
        }
        let Some(info) = self.fs.get_info(path).await? else {
            debug!(path = %path, "modified entry already gone");
            return Ok(());
        };

        if info.folderish {
            // A directory-modify carries no content change; persist the
            // metadata and settle the pair instead of queueing it.
            self.store.update_local_state(&mut pair, &info, false).await?;
            self.settle_metadata_touch(&mut pair).await?;
            return Ok(());
        }

        let digest = self.fs.compute_digest(path).await?;
        if pair.local_digest.as_deref() == Some(digest.as_str()) {
            self.store.update_local_state(&mut pair, &info, false).await?;
            self.settle_metadata_touch(&mut pair).await?;
        } else {
            pair.local_digest = Some(digest);
            if pair.local_state == HalfState::Synchronized {
                pair.local_state = HalfState::Modified;
            }
            self.store.update_local_state(&mut pair, &info, true).await?;
            self.metrics.update_files.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Bumps a settled pair's version after an unqueued metadata touch.
    /// Pairs still carrying pending work are left for the transfer
    /// workers to settle.
    async fn settle_metadata_touch(&self, pair: &mut DocPair) -> Result<()> {
        if pair.local_state == HalfState::Synchronized
            && pair.remote_state == HalfState::Synchronized
        {
            let next = pair.version + 1;
            self.store.synchronize_state(pair, next).await?;
        }
        Ok(())
    }

    async fn handle_deleted(&self, path: &NodePath) -> Result<()> {
        let Some(pair) = self.store.get_pair_by_local_path(path).await? else {
            return Ok(());
        };
        if pair.unsynchronized || pair.is_owned(Utc::now()) {
            debug!(path = %path, pair = %pair.describe(), "skipping delete on busy pair");
            return Ok(());
        }
        self.delete_pair_local(pair).await
    }

    async fn handle_moved(&self, src: &NodePath, dst: &NodePath) -> Result<()> {
        let Some(mut pair) = self.store.get_pair_by_local_path(src).await? else {
            // Source untracked: the move materializes something new at
            // the destination, or refreshes an existing pair there.
            return match self.store.get_pair_by_local_path(dst).await? {
                None => self.handle_created(dst).await,
                Some(_) => self.handle_modified(dst).await,
            };
        };
        if pair.unsynchronized || pair.is_owned(Utc::now()) {
            debug!(src = %src, pair = %pair.describe(), "skipping move on busy pair");
            return Ok(());
        }
        let Some(info) = self.fs.get_info(dst).await? else {
            debug!(dst = %dst, "move destination already gone");
            return Ok(());
        };

        // A pair still waiting for its first upload keeps reading as a
        // creation; only settled pairs become moves.
        if pair.local_state != HalfState::Created {
            pair.local_state = HalfState::Moved;
        }
        self.store.update_local_state(&mut pair, &info, true).await?;

        if info.folderish {
            self.rebase_descendants(src, dst).await?;
        }
        Ok(())
    }

    /// After a directory move, rewrites the stored local paths of every
    /// descendant from the old prefix to the new one. Metadata comes
    /// from a fresh stat at the new location; state is untouched.
    async fn rebase_descendants(&self, old: &NodePath, new: &NodePath) -> Result<()> {
        let mut stack = vec![(old.clone(), new.clone())];
        while let Some((old_dir, new_dir)) = stack.pop() {
            for mut child in self.store.get_local_children(&old_dir).await? {
                let Some(name) = child.local_name.clone() else {
                    continue;
                };
                let new_path = new_dir.join(&name)?;
                if child.folderish {
                    let old_path = old_dir.join(&name)?;
                    stack.push((old_path, new_path.clone()));
                }
                let Some(info) = self.fs.get_info(&new_path).await? else {
                    continue;
                };
                self.store.update_local_state(&mut child, &info, false).await?;
            }
        }
        Ok(())
    }
}
