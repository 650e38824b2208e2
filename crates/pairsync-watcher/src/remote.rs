//! Remote change watcher
//!
//! Mirrors the remote document hierarchy into the pair-state store. On a
//! cold start (no persisted full-scan watermark) it walks the whole
//! remote tree; afterwards it polls the server's change summary on an
//! interval and applies the batch most-recent-first.
//!
//! The change-log cursor is persisted with every pass, including empty
//! ones, so the watermark only ever moves forward.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use pairsync_core::domain::cursor::{
    RemoteCursor, KEY_LAST_EVENT_LOG_ID, KEY_LAST_FULL_SCAN, KEY_LAST_ROOT_DEFINITIONS,
    KEY_LAST_SYNC_DATE,
};
use pairsync_core::domain::newtypes::NodePath;
use pairsync_core::domain::pair::{DocPair, HalfState};
use pairsync_core::ports::remote_api::{
    ChangeSummary, IRemoteApi, RemoteChange, RemoteInfo, EVENT_DELETED, EVENT_DOCUMENT_MOVED,
    EVENT_SECURITY_UPDATED, VIRTUAL_ROOTS_FACTORY,
};
use pairsync_core::ports::state_store::IPairStateStore;

use crate::events::normalize_name;

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Default)]
pub struct RemoteWatcherMetrics {
    last_changes: AtomicU64,
    empty_polls: AtomicU64,
    remote_scans: AtomicU64,
    last_scan_duration_ms: AtomicU64,
    next_poll_in_secs: AtomicU64,
}

impl RemoteWatcherMetrics {
    pub fn last_changes(&self) -> u64 {
        self.last_changes.load(Ordering::Relaxed)
    }
    pub fn empty_polls(&self) -> u64 {
        self.empty_polls.load(Ordering::Relaxed)
    }
    pub fn remote_scans(&self) -> u64 {
        self.remote_scans.load(Ordering::Relaxed)
    }
    pub fn last_scan_duration_ms(&self) -> u64 {
        self.last_scan_duration_ms.load(Ordering::Relaxed)
    }
    pub fn next_poll_in_secs(&self) -> u64 {
        self.next_poll_in_secs.load(Ordering::Relaxed)
    }
}

// ============================================================================
// RemoteChangeWatcher
// ============================================================================

/// Watches the remote side of the tree.
pub struct RemoteChangeWatcher {
    remote: Arc<dyn IRemoteApi>,
    store: Arc<dyn IPairStateStore>,
    poll_interval_secs: u64,
    metrics: Arc<RemoteWatcherMetrics>,
    initialized: watch::Sender<bool>,
}

impl RemoteChangeWatcher {
    pub fn new(
        remote: Arc<dyn IRemoteApi>,
        store: Arc<dyn IPairStateStore>,
        poll_interval_secs: u64,
    ) -> Self {
        let (initialized, _) = watch::channel(false);
        Self {
            remote,
            store,
            poll_interval_secs: poll_interval_secs.max(1),
            metrics: Arc::new(RemoteWatcherMetrics::default()),
            initialized,
        }
    }

    /// Flips to true once the startup scan or first poll has completed.
    pub fn initialized(&self) -> watch::Receiver<bool> {
        self.initialized.subscribe()
    }

    pub fn metrics(&self) -> Arc<RemoteWatcherMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs the watcher until cancelled. Cold start (no full-scan
    /// watermark) walks the remote tree; otherwise one immediate poll,
    /// then the countdown loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let cursor = self.load_cursor().await?;
        if cursor.last_full_scan.is_none() {
            self.full_scan(&cancel).await?;
        } else if let Err(e) = self.poll_once(&cancel).await {
            warn!(error = %e, "startup poll failed, will retry on interval");
        }
        let _ = self.initialized.send(true);

        let mut remaining = self.poll_interval_secs;
        self.metrics
            .next_poll_in_secs
            .store(remaining, Ordering::Relaxed);
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("remote watcher stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if remaining == 0 {
                        if let Err(e) = self.poll_once(&cancel).await {
                            warn!(error = %e, "remote poll failed, will retry on interval");
                        }
                        remaining = self.poll_interval_secs;
                    } else {
                        remaining -= 1;
                    }
                    self.metrics.next_poll_in_secs.store(remaining, Ordering::Relaxed);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Cursor persistence
    // ------------------------------------------------------------------------

    async fn load_cursor(&self) -> Result<RemoteCursor> {
        Ok(RemoteCursor::from_config(
            self.store.get_config(KEY_LAST_SYNC_DATE).await?,
            self.store.get_config(KEY_LAST_EVENT_LOG_ID).await?,
            self.store.get_config(KEY_LAST_ROOT_DEFINITIONS).await?,
            self.store.get_config(KEY_LAST_FULL_SCAN).await?,
        ))
    }

    async fn save_cursor(&self, cursor: &RemoteCursor) -> Result<()> {
        for (key, value) in cursor.entries() {
            self.store.update_config(key, value.as_deref()).await?;
        }
        Ok(())
    }

    /// Folds a fresh change summary into the persisted cursor. The sync
    /// date never moves backwards; the event-log id is only kept when
    /// the server actually supports it.
    fn advanced_cursor(&self, cursor: &RemoteCursor, summary: &ChangeSummary) -> RemoteCursor {
        RemoteCursor {
            sync_date: Some(match cursor.sync_date {
                Some(prev) => prev.max(summary.sync_date),
                None => summary.sync_date,
            }),
            event_log_id: if self.remote.is_event_log_id_available() {
                summary.upper_bound.or(cursor.event_log_id)
            } else {
                None
            },
            root_definitions: Some(summary.active_roots.clone()),
            last_full_scan: cursor.last_full_scan,
        }
    }

    // ------------------------------------------------------------------------
    // Full scan
    // ------------------------------------------------------------------------

    /// Walks the remote tree from the bound root pair. The change cursor
    /// is fetched before the walk and persisted with the scan watermark
    /// after it, so the next poll starts exactly where the scan left off.
    #[instrument(skip_all)]
    pub async fn full_scan(&self, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        info!("remote full scan starting");

        // Fetched first, against the live cursor: every change that
        // happens during the walk is re-delivered by the first
        // incremental poll.
        let cursor = self.load_cursor().await?;
        let summary = self
            .remote
            .get_changes(
                cursor.root_definitions.as_deref(),
                cursor.event_log_id,
                cursor.sync_date,
            )
            .await?;

        let Some(root) = self.store.get_pair_by_local_path(&NodePath::root()).await? else {
            warn!("no root pair bound, skipping remote scan");
            return Ok(());
        };
        if root.remote_ref.is_none() {
            warn!("root pair has no remote binding, skipping remote scan");
            return Ok(());
        }

        let mut stack: Vec<(DocPair, bool)> = vec![(root, false)];
        while let Some((pair, force)) = stack.pop() {
            if cancel.is_cancelled() {
                info!("remote full scan interrupted");
                return Ok(());
            }
            if let Err(e) = self.scan_remote_children(&pair, force, &mut stack).await {
                warn!(pair = %pair.describe(), error = %e,
                      "skipping remote branch after scan error");
            }
        }

        let cursor = RemoteCursor {
            last_full_scan: Some(Utc::now()),
            ..self.advanced_cursor(&cursor, &summary)
        };
        self.save_cursor(&cursor).await?;
        self.store.commit().await?;

        let elapsed = started.elapsed().as_millis() as u64;
        self.metrics
            .last_scan_duration_ms
            .store(elapsed, Ordering::Relaxed);
        self.metrics.remote_scans.fetch_add(1, Ordering::Relaxed);
        info!(duration_ms = elapsed, "remote full scan finished");
        Ok(())
    }

    /// Reconciles one remote folder's children against the stored rows,
    /// keyed by remote id, then queues child folders on the work stack.
    async fn scan_remote_children(
        &self,
        parent: &DocPair,
        force: bool,
        stack: &mut Vec<(DocPair, bool)>,
    ) -> Result<()> {
        let Some(parent_ref) = parent.remote_ref.clone() else {
            return Ok(());
        };

        // A branch whose root became unreachable is marked deleted and
        // ends here; siblings keep scanning.
        if self.remote.get_info(&parent_ref).await?.is_none() {
            debug!(remote_ref = %parent_ref, "remote branch unreachable, marking deleted");
            let mut pair = parent.clone();
            self.delete_pair_remote(&mut pair).await?;
            return Ok(());
        }

        let remote_children = self.remote.get_children_info(&parent_ref).await?;
        let child_parent_path = format!(
            "{}/{}",
            parent.remote_parent_path.clone().unwrap_or_default(),
            parent_ref.as_str()
        );

        let mut known: HashMap<String, DocPair> = HashMap::new();
        for pair in self.store.get_remote_children(&parent_ref).await? {
            if let Some(r) = pair.remote_ref.clone() {
                known.insert(r.as_str().to_string(), pair);
            }
        }

        let now = Utc::now();
        let mut seen: HashSet<String> = HashSet::new();
        for info in &remote_children {
            seen.insert(info.uid.as_str().to_string());

            match known.get(info.uid.as_str()) {
                Some(pair) => {
                    let mut pair = pair.clone();
                    if !pair.is_owned(now)
                        && (force || remote_half_changed(&pair, info))
                    {
                        self.refresh_remote_pair(&mut pair, info, &child_parent_path)
                            .await?;
                    }
                    if pair.folderish {
                        stack.push((pair, force));
                    }
                }
                None => {
                    let (pair, _created) = self
                        .find_remote_child_match_or_create(parent, info, &child_parent_path)
                        .await?;
                    if pair.folderish {
                        stack.push((pair, force));
                    }
                }
            }
        }

        for (uid, pair) in known {
            if seen.contains(&uid) {
                continue;
            }
            if pair.is_owned(now) {
                continue;
            }
            self.delete_branch_remote(pair).await?;
        }

        self.store.commit().await?;
        Ok(())
    }

    /// Applies a remote-side refresh: name or parent change reads as a
    /// move, anything else on a settled pair as a modification.
    async fn refresh_remote_pair(
        &self,
        pair: &mut DocPair,
        info: &RemoteInfo,
        remote_parent_path: &str,
    ) -> Result<()> {
        let moved = pair.remote_name.as_deref() != Some(info.name.as_str())
            || pair.remote_parent_ref.as_ref() != Some(&info.parent_uid);
        if pair.remote_state == HalfState::Synchronized {
            pair.remote_state = if moved {
                HalfState::Moved
            } else {
                HalfState::Modified
            };
        }
        self.store
            .update_remote_state(pair, info, remote_parent_path)
            .await?;
        debug!(pair = %pair.describe(), "remote state refreshed");
        Ok(())
    }

    /// Unmatched remote child: adopt a local-only row sitting at the
    /// expected local path, or insert a fresh remote-only row.
    async fn find_remote_child_match_or_create(
        &self,
        parent: &DocPair,
        info: &RemoteInfo,
        remote_parent_path: &str,
    ) -> Result<(DocPair, bool)> {
        let parent_local = parent
            .local_path
            .clone()
            .unwrap_or_else(NodePath::root);
        let local_path = parent_local.join(&normalize_name(&info.name))?;

        if let Some(mut existing) = self.store.get_pair_by_local_path(&local_path).await? {
            if existing.remote_ref.is_none() {
                // The local watcher saw this entry first; bind instead of
                // duplicating.
                existing.remote_state = HalfState::Created;
                self.store
                    .update_remote_state(&mut existing, info, remote_parent_path)
                    .await?;
                if existing.folderish == info.folderish
                    && (info.folderish || existing.local_digest == info.digest)
                {
                    // Both sides already agree; settle without a transfer.
                    existing.local_state = HalfState::Synchronized;
                    existing.remote_state = HalfState::Synchronized;
                    let next = existing.version + 1;
                    self.store.synchronize_state(&mut existing, next).await?;
                }
                debug!(pair = %existing.describe(), "adopted local-only pair");
                return Ok((existing, false));
            }
        }

        let id = self
            .store
            .insert_remote_state(info, remote_parent_path, &local_path, &parent_local)
            .await?;
        let pair = self
            .store
            .get_pair(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("pair {id} vanished right after insert"))?;
        debug!(pair = %pair.describe(), "remote pair inserted");
        Ok((pair, true))
    }

    async fn delete_pair_remote(&self, pair: &mut DocPair) -> Result<()> {
        if pair.local_state == HalfState::Unknown {
            self.store.remove_pair(pair).await?;
        } else {
            self.store.delete_remote_state(pair).await?;
        }
        Ok(())
    }

    /// Marks a row and all its stored descendants remotely deleted.
    async fn delete_branch_remote(&self, pair: DocPair) -> Result<()> {
        let mut stack = vec![pair];
        while let Some(mut pair) = stack.pop() {
            if let Some(r) = pair.remote_ref.clone() {
                for child in self.store.get_remote_children(&r).await? {
                    stack.push(child);
                }
            }
            self.delete_pair_remote(&mut pair).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Incremental polling
    // ------------------------------------------------------------------------

    /// One incremental pass: fetch the summary, apply the batch
    /// most-recent-first with per-id dedup, persist the cursor.
    #[instrument(skip_all)]
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<()> {
        let cursor = self.load_cursor().await?;
        let summary = self
            .remote
            .get_changes(
                cursor.root_definitions.as_deref(),
                cursor.event_log_id,
                cursor.sync_date,
            )
            .await?;

        // A changed root set means whole subtrees may have appeared or
        // disappeared without child-level events.
        if let Some(prev_roots) = cursor.root_definitions.as_deref() {
            if prev_roots != summary.active_roots {
                info!("synchronization roots changed, running full scan");
                self.full_scan(cancel).await?;
                return Ok(());
            }
        }

        let mut changes = summary.changes.clone();
        changes.sort_by_key(|c| std::cmp::Reverse(c.event_date));

        if changes.is_empty() {
            self.metrics.empty_polls.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(changes = changes.len(), "processing remote change batch");
        }

        let mut refreshed: HashSet<String> = HashSet::new();
        for change in &changes {
            if cancel.is_cancelled() {
                break;
            }
            if refreshed.contains(change.remote_ref.as_str()) {
                continue;
            }
            match self.handle_change(change, cancel).await {
                Ok(handled) => {
                    if handled {
                        refreshed.insert(change.remote_ref.as_str().to_string());
                    }
                }
                Err(e) => {
                    warn!(remote_ref = %change.remote_ref, event = %change.event_id,
                          error = %e, "dropping remote change after error");
                }
            }
        }

        self.metrics
            .last_changes
            .store(changes.len() as u64, Ordering::Relaxed);

        let cursor = self.advanced_cursor(&cursor, &summary);
        self.save_cursor(&cursor).await?;
        self.store.commit().await?;
        Ok(())
    }

    /// Applies one change-log entry. Returns true when the entry's id
    /// should count as refreshed for this batch.
    async fn handle_change(
        &self,
        change: &RemoteChange,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        // Exact match first, then the factory-relaxed partial match, so
        // a delete/securityUpdated boundary that re-issued the id under
        // a different factory still finds the pair.
        let mut matched = self.store.get_pairs_by_remote_ref(&change.remote_ref).await?;
        if matched.is_empty() {
            matched = self
                .store
                .get_pairs_by_partial_remote_ref(&change.remote_ref)
                .await?;
        }

        let Some(info) = change.fs_item.as_ref() else {
            if change.event_id == EVENT_DELETED || change.event_id == EVENT_SECURITY_UPDATED {
                return self.apply_remote_deletion(matched).await;
            }
            debug!(event = %change.event_id, "ignoring payload-less change");
            return Ok(true);
        };

        // Moving into the virtual roots container means the item left
        // the synchronized scope.
        if change.event_id == EVENT_DOCUMENT_MOVED
            && info.parent_uid.factory() == VIRTUAL_ROOTS_FACTORY
        {
            return self.apply_remote_deletion(matched).await;
        }

        // A move out of the virtual container into a real root is the
        // item entering scope: handle it as a creation.
        if change.event_id == EVENT_DOCUMENT_MOVED {
            matched.retain(|p| {
                p.remote_parent_ref
                    .as_ref()
                    .map(|r| r.factory() != VIRTUAL_ROOTS_FACTORY)
                    .unwrap_or(true)
            });
        }

        if matched.is_empty() {
            return self.handle_new_document(info, cancel).await;
        }

        let force_recursion = change.event_id == EVENT_SECURITY_UPDATED;
        let now = Utc::now();
        let mut any_applied = false;
        for mut pair in matched {
            if pair.is_owned(now) {
                debug!(pair = %pair.describe(), "skipping owned pair this pass");
                continue;
            }

            // An item filed in a collection reports the real sync root
            // as its parent. The pair stays bound to the collection
            // parent it was synchronized under; a path observed through
            // the secondary container is never stored.
            let via_collection = pair
                .remote_parent_ref
                .as_ref()
                .is_some_and(|r| r.factory() == VIRTUAL_ROOTS_FACTORY);
            if via_collection {
                let mut kept = info.clone();
                if let Some(parent_ref) = pair.remote_parent_ref.clone() {
                    kept.parent_uid = parent_ref;
                }
                let parent_path = pair.remote_parent_path.clone().unwrap_or_default();
                self.refresh_remote_pair(&mut pair, &kept, &parent_path).await?;
            } else {
                let parent_path = match self
                    .store
                    .get_pairs_by_remote_ref(&info.parent_uid)
                    .await?
                    .into_iter()
                    .next()
                {
                    Some(parent) if parent.remote_ref.is_some() => format!(
                        "{}/{}",
                        parent.remote_parent_path.unwrap_or_default(),
                        info.parent_uid.as_str()
                    ),
                    _ => pair.remote_parent_path.clone().unwrap_or_default(),
                };
                self.refresh_remote_pair(&mut pair, info, &parent_path).await?;
            }
            any_applied = true;

            if force_recursion && pair.folderish {
                let mut stack = vec![(pair, true)];
                while let Some((dir, force)) = stack.pop() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.scan_remote_children(&dir, force, &mut stack).await {
                        warn!(error = %e, "skipping remote branch after scan error");
                    }
                }
            }
        }
        Ok(any_applied)
    }

    async fn apply_remote_deletion(&self, matched: Vec<DocPair>) -> Result<bool> {
        let now = Utc::now();
        let mut any_applied = false;
        for pair in matched {
            if pair.is_owned(now) {
                // Left untouched; the next poll re-evaluates once the
                // lease is back.
                debug!(pair = %pair.describe(), "skipping owned pair for deletion");
                continue;
            }
            self.delete_branch_remote(pair).await?;
            any_applied = true;
        }
        Ok(any_applied)
    }

    /// Change for an id we do not track: place it under the first parent
    /// pair that matches its parent id, then recurse into a new folder.
    async fn handle_new_document(
        &self,
        info: &RemoteInfo,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let parents = self.store.get_pairs_by_remote_ref(&info.parent_uid).await?;
        let Some(parent) = parents.into_iter().next() else {
            debug!(remote_ref = %info.uid, "no tracked parent for new document");
            return Ok(true);
        };

        let parent_path = format!(
            "{}/{}",
            parent.remote_parent_path.clone().unwrap_or_default(),
            info.parent_uid.as_str()
        );
        let (pair, created) = self
            .find_remote_child_match_or_create(&parent, info, &parent_path)
            .await?;

        if created && pair.folderish {
            let mut stack = vec![(pair, false)];
            while let Some((dir, force)) = stack.pop() {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = self.scan_remote_children(&dir, force, &mut stack).await {
                    warn!(error = %e, "skipping remote branch after scan error");
                }
            }
        }
        Ok(true)
    }
}

/// Whether the stored remote half disagrees with the live listing.
fn remote_half_changed(pair: &DocPair, info: &RemoteInfo) -> bool {
    pair.remote_name.as_deref() != Some(info.name.as_str())
        || pair.remote_parent_ref.as_ref() != Some(&info.parent_uid)
        || pair.remote_digest != info.digest
        || pair.last_remote_updated != info.last_modified
        || pair.folderish != info.folderish
}
