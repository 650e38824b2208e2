//! In-memory implementation of `IPairStateStore`
//!
//! One `Mutex`-guarded table of doc pairs plus the key/value config map,
//! the transfer queue and a commit counter. Every trait method takes the
//! lock once, mutates, and releases before returning, so no lock is ever
//! held across an await point.
//!
//! The `commit()` boundary is observable (a counter) rather than durable:
//! tests assert that watchers commit at the right moments, which is the
//! part of the durability contract this crate can check.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, trace};

use pairsync_core::domain::newtypes::{NodePath, PairId, RemoteRef};
use pairsync_core::domain::pair::{DocPair, HalfState};
use pairsync_core::ports::local_filesystem::LocalInfo;
use pairsync_core::ports::remote_api::RemoteInfo;
use pairsync_core::ports::state_store::IPairStateStore;

use crate::StoreError;

#[derive(Default)]
struct Inner {
    pairs: HashMap<PairId, DocPair>,
    config: HashMap<String, String>,
    transfer_queue: Vec<PairId>,
    next_id: u64,
    commits: u64,
}

impl Inner {
    fn next_pair_id(&mut self) -> PairId {
        self.next_id += 1;
        PairId::from_raw(self.next_id)
    }

    fn write_back(&mut self, pair: &DocPair) -> Result<(), StoreError> {
        if !self.pairs.contains_key(&pair.id) {
            return Err(StoreError::NoSuchPair(pair.id.as_u64()));
        }
        self.pairs.insert(pair.id, pair.clone());
        Ok(())
    }

    fn queue_for_transfer(&mut self, id: PairId) {
        if !self.transfer_queue.contains(&id) {
            self.transfer_queue.push(id);
        }
    }
}

/// In-memory pair-state store.
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    /// Creates an empty store with no bound root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Creates a store seeded with a synchronized root pair binding the
    /// watched directory to `remote_ref`. The remote full scan starts
    /// from this pair.
    #[must_use]
    pub fn new_bound(remote_ref: RemoteRef) -> Self {
        let mut inner = Inner::default();
        let id = inner.next_pair_id();
        inner.pairs.insert(id, DocPair::root(id, remote_ref));
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Pair ids currently queued for the transfer workers, in queue order.
    pub fn pending_transfers(&self) -> Vec<PairId> {
        self.lock().map(|i| i.transfer_queue.clone()).unwrap_or_default()
    }

    /// Drains the transfer queue (what a transfer worker pool would do).
    pub fn drain_transfer_queue(&self) -> Vec<PairId> {
        self.lock()
            .map(|mut i| std::mem::take(&mut i.transfer_queue))
            .unwrap_or_default()
    }

    /// Number of `commit()` calls seen so far.
    pub fn commit_count(&self) -> u64 {
        self.lock().map(|i| i.commits).unwrap_or(0)
    }

    /// Number of pair rows currently stored.
    pub fn pair_count(&self) -> usize {
        self.lock().map(|i| i.pairs.len()).unwrap_or(0)
    }

    /// All local paths currently stored, sorted. Test helper for scan
    /// equivalence assertions.
    pub fn local_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .lock()
            .map(|i| {
                i.pairs
                    .values()
                    .filter_map(|p| p.local_path.as_ref().map(|p| p.as_str().to_string()))
                    .collect()
            })
            .unwrap_or_default();
        paths.sort();
        paths
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IPairStateStore for MemoryStateStore {
    async fn get_local_children(&self, parent: &NodePath) -> anyhow::Result<Vec<DocPair>> {
        let inner = self.lock()?;
        Ok(inner
            .pairs
            .values()
            .filter(|p| p.local_parent_path.as_ref() == Some(parent))
            .cloned()
            .collect())
    }

    async fn get_remote_children(&self, parent_ref: &RemoteRef) -> anyhow::Result<Vec<DocPair>> {
        let inner = self.lock()?;
        Ok(inner
            .pairs
            .values()
            .filter(|p| p.remote_parent_ref.as_ref() == Some(parent_ref))
            .cloned()
            .collect())
    }

    async fn get_pair(&self, id: PairId) -> anyhow::Result<Option<DocPair>> {
        Ok(self.lock()?.pairs.get(&id).cloned())
    }

    async fn get_pair_by_local_path(&self, path: &NodePath) -> anyhow::Result<Option<DocPair>> {
        let inner = self.lock()?;
        Ok(inner
            .pairs
            .values()
            .find(|p| p.local_path.as_ref() == Some(path))
            .cloned())
    }

    async fn get_pairs_by_remote_ref(
        &self,
        remote_ref: &RemoteRef,
    ) -> anyhow::Result<Vec<DocPair>> {
        let inner = self.lock()?;
        Ok(inner
            .pairs
            .values()
            .filter(|p| p.remote_ref.as_ref() == Some(remote_ref))
            .cloned()
            .collect())
    }

    async fn get_pairs_by_partial_remote_ref(
        &self,
        remote_ref: &RemoteRef,
    ) -> anyhow::Result<Vec<DocPair>> {
        let inner = self.lock()?;
        Ok(inner
            .pairs
            .values()
            .filter(|p| {
                p.remote_ref
                    .as_ref()
                    .is_some_and(|r| r.matches_partial(remote_ref))
            })
            .cloned()
            .collect())
    }

    async fn insert_local_state(
        &self,
        info: &LocalInfo,
        parent_path: &NodePath,
    ) -> anyhow::Result<PairId> {
        let mut inner = self.lock()?;
        let id = inner.next_pair_id();

        let mut pair = DocPair::new(id);
        pair.local_path = Some(info.path.clone());
        pair.local_parent_path = Some(parent_path.clone());
        pair.local_name = Some(info.name().to_string());
        pair.local_state = HalfState::Created;
        pair.last_local_updated = Some(info.mtime_key());
        pair.local_size = info.size;
        pair.folderish = info.folderish;

        trace!(id = %id, path = %info.path, "insert local state");
        inner.pairs.insert(id, pair);
        inner.queue_for_transfer(id);
        Ok(id)
    }

    async fn insert_remote_state(
        &self,
        info: &RemoteInfo,
        remote_parent_path: &str,
        local_path: &NodePath,
        local_parent_path: &NodePath,
    ) -> anyhow::Result<PairId> {
        let mut inner = self.lock()?;
        let id = inner.next_pair_id();

        let mut pair = DocPair::new(id);
        pair.remote_ref = Some(info.uid.clone());
        pair.remote_parent_ref = Some(info.parent_uid.clone());
        pair.remote_parent_path = Some(remote_parent_path.to_string());
        pair.remote_name = Some(info.name.clone());
        pair.remote_state = HalfState::Created;
        pair.remote_digest = info.digest.clone();
        pair.last_remote_updated = info.last_modified;
        pair.folderish = info.folderish;
        // Expected local placement; the local half stays unknown until the
        // local watcher sights the materialized file.
        pair.local_path = Some(local_path.clone());
        pair.local_parent_path = Some(local_parent_path.clone());
        pair.local_name = Some(local_path.name().to_string());

        trace!(id = %id, remote_ref = %info.uid, "insert remote state");
        inner.pairs.insert(id, pair);
        inner.queue_for_transfer(id);
        Ok(id)
    }

    async fn update_local_state(
        &self,
        pair: &mut DocPair,
        info: &LocalInfo,
        queue: bool,
    ) -> anyhow::Result<()> {
        pair.local_path = Some(info.path.clone());
        pair.local_parent_path = info.path.parent();
        pair.local_name = Some(info.name().to_string());
        pair.last_local_updated = Some(info.mtime_key());
        pair.local_size = info.size;
        pair.folderish = info.folderish;
        if pair.folderish {
            pair.local_digest = None;
        }

        let mut inner = self.lock()?;
        inner.write_back(pair)?;
        if queue {
            inner.queue_for_transfer(pair.id);
        }
        trace!(id = %pair.id, path = %info.path, queue, "update local state");
        Ok(())
    }

    async fn update_remote_state(
        &self,
        pair: &mut DocPair,
        info: &RemoteInfo,
        remote_parent_path: &str,
    ) -> anyhow::Result<()> {
        pair.remote_ref = Some(info.uid.clone());
        pair.remote_parent_ref = Some(info.parent_uid.clone());
        pair.remote_parent_path = Some(remote_parent_path.to_string());
        pair.remote_name = Some(info.name.clone());
        pair.remote_digest = info.digest.clone();
        pair.last_remote_updated = info.last_modified;
        pair.folderish = info.folderish;

        let mut inner = self.lock()?;
        inner.write_back(pair)?;
        // A pending remote half means the local side has catching up to do.
        if matches!(
            pair.remote_state,
            HalfState::Created | HalfState::Modified | HalfState::Moved
        ) {
            inner.queue_for_transfer(pair.id);
        }
        trace!(id = %pair.id, remote_ref = %info.uid, "update remote state");
        Ok(())
    }

    async fn delete_local_state(&self, pair: &mut DocPair) -> anyhow::Result<()> {
        pair.local_state = HalfState::Deleted;
        let mut inner = self.lock()?;
        inner.write_back(pair)?;
        inner.queue_for_transfer(pair.id);
        debug!(id = %pair.id, pair = %pair.describe(), "local state deleted");
        Ok(())
    }

    async fn delete_remote_state(&self, pair: &mut DocPair) -> anyhow::Result<()> {
        pair.remote_state = HalfState::Deleted;
        let mut inner = self.lock()?;
        inner.write_back(pair)?;
        inner.queue_for_transfer(pair.id);
        debug!(id = %pair.id, pair = %pair.describe(), "remote state deleted");
        Ok(())
    }

    async fn remove_pair(&self, pair: &DocPair) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        inner.pairs.remove(&pair.id);
        inner.transfer_queue.retain(|id| *id != pair.id);
        debug!(id = %pair.id, pair = %pair.describe(), "pair removed");
        Ok(())
    }

    async fn synchronize_state(
        &self,
        pair: &mut DocPair,
        expected_version: u64,
    ) -> anyhow::Result<bool> {
        let mut inner = self.lock()?;
        let stored = inner
            .pairs
            .get(&pair.id)
            .ok_or(StoreError::NoSuchPair(pair.id.as_u64()))?;

        // Optimistic concurrency: a transfer worker that advanced the pair
        // since the caller read it wins, and the caller's synchronize is a
        // no-op. Version never decreases.
        if stored.version != pair.version || expected_version <= stored.version {
            trace!(
                id = %pair.id,
                stored = stored.version,
                caller = pair.version,
                expected = expected_version,
                "synchronize skipped (version mismatch)"
            );
            return Ok(false);
        }

        pair.local_state = HalfState::Synchronized;
        pair.remote_state = HalfState::Synchronized;
        pair.version = expected_version;
        inner.write_back(pair)?;
        trace!(id = %pair.id, version = expected_version, "pair synchronized");
        Ok(true)
    }

    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.lock()?.config.get(key).cloned())
    }

    async fn update_config(&self, key: &str, value: Option<&str>) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        match value {
            Some(v) => {
                inner.config.insert(key.to_string(), v.to_string());
            }
            None => {
                inner.config.remove(key);
            }
        }
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        inner.commits += 1;
        trace!(commits = inner.commits, "store commit");
        Ok(())
    }
}

// ============================================================================
// Unit tests
// ============================================================================
