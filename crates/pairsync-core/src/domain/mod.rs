//! Domain entities and business logic
//!
//! This module contains the core domain types for PairSync:
//! - Newtypes for type-safe identifiers and validated paths
//! - The doc pair entity and its half-state / pair-state machinery
//! - The processor lease used as a cooperative ownership marker
//! - The persisted remote cursor (watermark)
//! - Domain-specific error types

pub mod cursor;
pub mod errors;
pub mod newtypes;
pub mod pair;

// Re-export commonly used types
pub use cursor::RemoteCursor;
pub use errors::DomainError;
pub use newtypes::{NodePath, PairId, RemoteRef};
pub use pair::{DocPair, HalfState, PairState, ProcessorLease};
