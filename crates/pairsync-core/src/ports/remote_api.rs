//! Remote API port (driven/secondary port)
//!
//! Only the change-summary and tree-listing contract of the remote server
//! matters to this engine; the HTTP client implementing it is an external
//! collaborator. The types here mirror the wire payloads the remote
//! watcher consumes.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::RemoteRef;

/// Change-log event: the item disappeared remotely.
pub const EVENT_DELETED: &str = "deleted";
/// Change-log event: read access was revoked; treated like a delete.
pub const EVENT_SECURITY_UPDATED: &str = "securityUpdated";
/// Change-log event: the item moved to another remote parent.
pub const EVENT_DOCUMENT_MOVED: &str = "documentMoved";

/// Factory prefix of the virtual container that groups synchronization
/// roots. Moves in and out of this container are scope changes, not real
/// moves, and get creation/deletion semantics instead.
pub const VIRTUAL_ROOTS_FACTORY: &str = "collectionSyncRootFolderItemFactory";

/// Metadata of one item in the remote hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteInfo {
    pub uid: RemoteRef,
    pub parent_uid: RemoteRef,
    pub name: String,
    pub folderish: bool,
    pub last_modified: Option<DateTime<Utc>>,
    /// Server-side content digest; absent for folders.
    pub digest: Option<String>,
}

/// One entry of the remote change log.
///
/// `fs_item` is absent for `deleted` and `securityUpdated` events, which
/// is exactly how the watcher tells them apart from content changes.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    /// Event kind, e.g. `documentCreated`, `documentMoved`, `deleted`.
    pub event_id: String,
    /// The item the event applies to.
    pub remote_ref: RemoteRef,
    /// Server event timestamp in epoch milliseconds; orders the batch.
    pub event_date: i64,
    /// Full item payload when the item is still visible.
    pub fs_item: Option<RemoteInfo>,
}

/// Result of one change-summary poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSummary {
    pub changes: Vec<RemoteChange>,
    /// New server sync date (epoch milliseconds); persisted even when
    /// `changes` is empty so the watermark always advances.
    pub sync_date: i64,
    /// New upper bound of the event log, when the server exposes one.
    pub upper_bound: Option<i64>,
    /// Opaque encoding of the currently active synchronization roots.
    pub active_roots: String,
}

/// Port trait for the remote document hierarchy.
#[async_trait::async_trait]
pub trait IRemoteApi: Send + Sync {
    /// Metadata for one remote item; `None` when it is gone or unreadable.
    async fn get_info(&self, remote_ref: &RemoteRef) -> anyhow::Result<Option<RemoteInfo>>;

    /// Children of a remote folder.
    async fn get_children_info(&self, remote_ref: &RemoteRef)
        -> anyhow::Result<Vec<RemoteInfo>>;

    /// Incremental change summary since the given cursor fields.
    async fn get_changes(
        &self,
        root_definitions: Option<&str>,
        last_event_log_id: Option<i64>,
        last_sync_date: Option<i64>,
    ) -> anyhow::Result<ChangeSummary>;

    /// Whether the server exposes event-log ids (newer audit change finder).
    fn is_event_log_id_available(&self) -> bool;
}
