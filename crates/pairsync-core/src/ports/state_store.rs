//! Pair-state store port (driven/secondary port)
//!
//! The durable table of doc pairs plus a small key/value cursor store.
//! Both watchers read and write through this trait; the transfer workers
//! (out of scope) consume the transfer queue it feeds.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific and
//!   don't need domain-level classification.
//! - Mutating operations take `&mut DocPair` and write the caller's copy
//!   back so the in-memory pair always reflects what was persisted.
//! - Half-states are written by the watchers, never by the store; the
//!   store only fills the identity/metadata fields it derives from the
//!   `LocalInfo` / `RemoteInfo` arguments.
//! - `commit()` is the explicit durability boundary. Watchers call it
//!   after each reconciled directory level so a crash leaves a consistent,
//!   already-durable prefix of the tree.

use crate::domain::newtypes::{NodePath, PairId, RemoteRef};
use crate::domain::pair::DocPair;

use super::local_filesystem::LocalInfo;
use super::remote_api::RemoteInfo;

/// Port trait for the persisted pair-state table and cursor store.
#[async_trait::async_trait]
pub trait IPairStateStore: Send + Sync {
    // --- Children lookups ---

    /// Pairs whose local parent path equals `parent`.
    async fn get_local_children(&self, parent: &NodePath) -> anyhow::Result<Vec<DocPair>>;

    /// Pairs whose remote parent ref equals `parent_ref`.
    async fn get_remote_children(&self, parent_ref: &RemoteRef) -> anyhow::Result<Vec<DocPair>>;

    // --- Point lookups ---

    /// Pair by row id.
    async fn get_pair(&self, id: PairId) -> anyhow::Result<Option<DocPair>>;

    /// Pair by exact local path.
    async fn get_pair_by_local_path(&self, path: &NodePath) -> anyhow::Result<Option<DocPair>>;

    /// All pairs with this exact remote ref. More than one is possible when
    /// the same document is mirrored under two synchronization points.
    async fn get_pairs_by_remote_ref(&self, remote_ref: &RemoteRef)
        -> anyhow::Result<Vec<DocPair>>;

    /// Relaxed lookup ignoring the factory prefix, to tolerate factory-id
    /// changes across delete/securityUpdated boundaries.
    async fn get_pairs_by_partial_remote_ref(
        &self,
        remote_ref: &RemoteRef,
    ) -> anyhow::Result<Vec<DocPair>>;

    // --- Inserts ---

    /// Inserts a local-only pair (`local_state = created`, remote half
    /// unknown) under the given parent path. Returns the new row id.
    async fn insert_local_state(
        &self,
        info: &LocalInfo,
        parent_path: &NodePath,
    ) -> anyhow::Result<PairId>;

    /// Inserts a remote-only pair (`remote_state = created`, local half
    /// unknown) with its expected local placement. Returns the new row id.
    async fn insert_remote_state(
        &self,
        info: &RemoteInfo,
        remote_parent_path: &str,
        local_path: &NodePath,
        local_parent_path: &NodePath,
    ) -> anyhow::Result<PairId>;

    // --- Updates ---

    /// Persists the local half from fresh metadata: path, name, mtime key,
    /// folderish flag (clearing any digest on a folder). When `queue` is
    /// true the pair is also queued for the transfer workers.
    async fn update_local_state(
        &self,
        pair: &mut DocPair,
        info: &LocalInfo,
        queue: bool,
    ) -> anyhow::Result<()>;

    /// Persists the remote half from fresh metadata and the given remote
    /// parent path.
    async fn update_remote_state(
        &self,
        pair: &mut DocPair,
        info: &RemoteInfo,
        remote_parent_path: &str,
    ) -> anyhow::Result<()>;

    /// Marks the local half deleted and persists, keeping the row for
    /// deletion propagation.
    async fn delete_local_state(&self, pair: &mut DocPair) -> anyhow::Result<()>;

    /// Marks the remote half deleted and persists, keeping the row for
    /// deletion propagation.
    async fn delete_remote_state(&self, pair: &mut DocPair) -> anyhow::Result<()>;

    /// Removes the row outright (no counterpart left to propagate to).
    async fn remove_pair(&self, pair: &DocPair) -> anyhow::Result<()>;

    /// Marks both halves synchronized at `expected_version`, but only if
    /// the stored version still matches the caller's copy (optimistic
    /// concurrency against transfer workers). Returns whether it applied.
    async fn synchronize_state(
        &self,
        pair: &mut DocPair,
        expected_version: u64,
    ) -> anyhow::Result<bool>;

    // --- Config / durability ---

    /// Reads one key/value config entry.
    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Writes or clears one key/value config entry.
    async fn update_config(&self, key: &str, value: Option<&str>) -> anyhow::Result<()>;

    /// Explicit durability boundary; everything written since the last
    /// commit becomes durable together.
    async fn commit(&self) -> anyhow::Result<()>;
}
