//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the trait boundaries the watchers depend on; implementations
//! live in adapter crates or in test fixtures.
//!
//! ## Ports Overview
//!
//! - [`ILocalFileSystem`] - metadata, children listings, digests and ignore
//!   rules for the watched directory tree
//! - [`IRemoteApi`] - the remote hierarchy's tree-listing and change-summary
//!   contract (the HTTP client behind it is out of scope)
//! - [`IPairStateStore`] - the durable doc-pair table and key/value cursor
//!   store

pub mod local_filesystem;
pub mod remote_api;
pub mod state_store;

pub use local_filesystem::{ILocalFileSystem, LocalInfo};
pub use remote_api::{
    ChangeSummary, IRemoteApi, RemoteChange, RemoteInfo, EVENT_DELETED, EVENT_DOCUMENT_MOVED,
    EVENT_SECURITY_UPDATED, VIRTUAL_ROOTS_FACTORY,
};
pub use state_store::IPairStateStore;
