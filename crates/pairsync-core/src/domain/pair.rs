//! Doc pair entity and synchronization state machinery
//!
//! A [`DocPair`] is the unit of synchronization state: one row per
//! (local-path, remote-ref) association actually or potentially mirrored.
//! Each side carries an independent [`HalfState`] written only by its own
//! watcher; the combined [`PairState`] is always *derived* from the two
//! half-states through a fixed lookup table and never stored on its own.
//!
//! ## Ownership
//!
//! Transfer workers take a [`ProcessorLease`] on a pair while they move its
//! content. The lease is cooperative: watchers must check
//! [`DocPair::is_owned`] before mutating and skip owned pairs for the
//! current pass. An expired lease counts as unowned so a crashed worker
//! never blocks a pair forever.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{NodePath, PairId, RemoteRef};

// ============================================================================
// HalfState
// ============================================================================

/// Per-side synchronization state of one half of a doc pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalfState {
    /// Nothing known about this side yet (no counterpart discovered).
    Unknown,
    /// The item appeared on this side and has not been propagated.
    Created,
    /// The item changed on this side since the last synchronized point.
    Modified,
    /// The item moved on this side since the last synchronized point.
    Moved,
    /// The item disappeared on this side.
    Deleted,
    /// This side matches the last synchronized point.
    Synchronized,
}

impl HalfState {
    /// Stable lowercase name, used for logging and store serialization.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            HalfState::Unknown => "unknown",
            HalfState::Created => "created",
            HalfState::Modified => "modified",
            HalfState::Moved => "moved",
            HalfState::Deleted => "deleted",
            HalfState::Synchronized => "synchronized",
        }
    }

    /// All half-states, for exhaustive table tests.
    #[must_use]
    pub const fn all() -> [HalfState; 6] {
        [
            HalfState::Unknown,
            HalfState::Created,
            HalfState::Modified,
            HalfState::Moved,
            HalfState::Deleted,
            HalfState::Synchronized,
        ]
    }
}

// ============================================================================
// PairState
// ============================================================================

/// Combined synchronization status of a pair, derived from the half-states.
///
/// The transfer workers consume these to decide what content operation a
/// pair needs next. `Unsynchronized` is the one value that does not come
/// out of the table: it is the user opting a branch out of synchronization
/// and overrides whatever the half-states say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    Unknown,
    Synchronized,
    LocallyCreated,
    RemotelyCreated,
    LocallyModified,
    RemotelyModified,
    LocallyMoved,
    RemotelyMoved,
    LocallyDeleted,
    RemotelyDeleted,
    /// Both sides confirmed the item gone; the row is ready for removal.
    Deleted,
    /// Both sides changed independently; conflict resolution takes over.
    Conflicted,
    /// User opted this branch out of synchronization.
    Unsynchronized,
}

impl PairState {
    /// The fixed lookup table from `(local_state, remote_state)`.
    ///
    /// Deletions dominate, then same-kind changes on both sides conflict,
    /// then single-sided changes map to their directional state. A half that
    /// is `Unknown` while the other is `Synchronized` means the counterpart
    /// has not been discovered yet and reads as a pending creation on the
    /// known side.
    #[must_use]
    pub fn derive(local: HalfState, remote: HalfState) -> PairState {
        use HalfState::*;
        match (local, remote) {
            (Deleted, Deleted) => PairState::Deleted,
            (Deleted, _) => PairState::LocallyDeleted,
            (_, Deleted) => PairState::RemotelyDeleted,
            (Created, Created) | (Modified, Modified) | (Moved, Moved) => PairState::Conflicted,
            (Created, _) => PairState::LocallyCreated,
            (_, Created) => PairState::RemotelyCreated,
            (Moved, _) => PairState::LocallyMoved,
            (_, Moved) => PairState::RemotelyMoved,
            (Modified, _) => PairState::LocallyModified,
            (_, Modified) => PairState::RemotelyModified,
            (Synchronized, Synchronized) => PairState::Synchronized,
            (Synchronized, Unknown) => PairState::LocallyCreated,
            (Unknown, Synchronized) => PairState::RemotelyCreated,
            (Unknown, Unknown) => PairState::Unknown,
        }
    }
}

// ============================================================================
// ProcessorLease
// ============================================================================

/// Cooperative ownership marker held by a transfer worker.
///
/// `owner_id == 0` means unowned. A non-zero owner with an `expiry` in the
/// past is reclaimable and treated as unowned everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProcessorLease {
    /// Identifier of the owning transfer worker; zero when unowned.
    pub owner_id: u64,
    /// When the lease lapses; `None` means it never expires on its own.
    pub expiry: Option<DateTime<Utc>>,
}

impl ProcessorLease {
    /// The unowned lease.
    #[must_use]
    pub fn free() -> Self {
        Self::default()
    }

    /// Takes the lease for `owner_id`, valid for `ttl_secs` from `now`.
    #[must_use]
    pub fn acquire(owner_id: u64, ttl_secs: i64, now: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            expiry: Some(now + Duration::seconds(ttl_secs)),
        }
    }

    /// Drops the lease back to unowned.
    pub fn release(&mut self) {
        *self = Self::free();
    }

    /// Whether the lease is held (non-zero owner, not lapsed) at `now`.
    #[must_use]
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.owner_id != 0 && self.expiry.map_or(true, |e| e > now)
    }
}

// ============================================================================
// DocPair
// ============================================================================

/// The persisted record associating a local path and/or a remote item.
///
/// Either half may be absent: a pair can be local-only pending remote match
/// or remote-only pending local placement. Fields on the missing side stay
/// `None` with the half-state `Unknown` until the counterpart watcher
/// discovers a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocPair {
    /// Opaque persisted id, assigned by the store.
    pub id: PairId,

    // Local half
    pub local_path: Option<NodePath>,
    pub local_parent_path: Option<NodePath>,
    pub local_name: Option<String>,
    pub local_state: HalfState,
    /// Content digest of the local file; never set on folders.
    pub local_digest: Option<String>,
    /// Normalized local mtime key (`%Y-%m-%d %H:%M:%S`), the full-scan
    /// comparison token.
    pub last_local_updated: Option<String>,
    /// Size in bytes at the last local stat; zero for folders. Breaks the
    /// mtime-key tie for edits landing within the same second.
    pub local_size: u64,

    // Remote half
    pub remote_ref: Option<RemoteRef>,
    pub remote_parent_ref: Option<RemoteRef>,
    /// Remote ancestry path (chain of parent refs), as reported or
    /// substituted by the remote watcher.
    pub remote_parent_path: Option<String>,
    pub remote_name: Option<String>,
    pub remote_state: HalfState,
    pub remote_digest: Option<String>,
    pub last_remote_updated: Option<DateTime<Utc>>,

    // Shared
    pub folderish: bool,
    /// User opted this branch out of synchronization.
    pub unsynchronized: bool,
    /// Monotone counter advanced whenever reconciliation moves the pair
    /// toward synchronized; optimistic-concurrency token for transfer
    /// workers.
    pub version: u64,
    /// Cooperative ownership marker.
    pub lease: ProcessorLease,
}

impl DocPair {
    /// A blank pair with both halves unknown.
    #[must_use]
    pub fn new(id: PairId) -> Self {
        Self {
            id,
            local_path: None,
            local_parent_path: None,
            local_name: None,
            local_state: HalfState::Unknown,
            local_digest: None,
            last_local_updated: None,
            local_size: 0,
            remote_ref: None,
            remote_parent_ref: None,
            remote_parent_path: None,
            remote_name: None,
            remote_state: HalfState::Unknown,
            remote_digest: None,
            last_remote_updated: None,
            folderish: false,
            unsynchronized: false,
            version: 0,
            lease: ProcessorLease::free(),
        }
    }

    /// The bound root pair: local `/`, both halves synchronized, folderish.
    ///
    /// Stores are seeded with one of these when a remote root is bound to
    /// the watched directory; the remote full scan starts from it.
    #[must_use]
    pub fn root(id: PairId, remote_ref: RemoteRef) -> Self {
        let mut pair = Self::new(id);
        pair.local_path = Some(NodePath::root());
        pair.local_name = Some(String::new());
        pair.local_state = HalfState::Synchronized;
        pair.remote_ref = Some(remote_ref);
        pair.remote_parent_path = Some(String::new());
        pair.remote_state = HalfState::Synchronized;
        pair.folderish = true;
        pair
    }

    /// Derived pair state; see [`PairState::derive`].
    #[must_use]
    pub fn pair_state(&self) -> PairState {
        if self.unsynchronized {
            PairState::Unsynchronized
        } else {
            PairState::derive(self.local_state, self.remote_state)
        }
    }

    /// Whether a transfer worker currently owns this pair at `now`.
    #[must_use]
    pub fn is_owned(&self, now: DateTime<Utc>) -> bool {
        self.lease.is_held(now)
    }

    /// Display handle for logs: local path if present, else remote name.
    #[must_use]
    pub fn describe(&self) -> String {
        if let Some(path) = &self.local_path {
            path.to_string()
        } else if let Some(name) = &self.remote_name {
            name.clone()
        } else {
            format!("pair#{}", self.id)
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
