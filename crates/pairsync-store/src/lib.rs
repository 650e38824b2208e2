//! PairSync Store - In-memory pair-state persistence
//!
//! Implements the `IPairStateStore` port from `pairsync-core` with plain
//! in-process tables. This is the store the watchers run against in tests
//! and in single-process deployments; a durable adapter (SQLite or
//! similar) can replace it behind the same port without touching the
//! watchers, since the storage format is an external concern.
//!
//! ## Key Components
//!
//! - [`MemoryStateStore`] - full `IPairStateStore` implementation with an
//!   observable transfer queue and commit counter
//! - [`StoreError`] - error types for store operations

pub mod memory;

pub use memory::MemoryStateStore;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced pair row does not exist (stale caller copy)
    #[error("No such pair row: {0}")]
    NoSuchPair(u64),

    /// The store's internal lock was poisoned by a panicking thread
    #[error("State store lock poisoned")]
    LockPoisoned,
}
