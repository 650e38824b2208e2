//! Domain error types

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid tree path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid remote reference format
    #[error("Invalid remote reference: {0}")]
    InvalidRemoteRef(String),

    /// A folderish pair must never carry a content digest
    #[error("Folder pair cannot carry a content digest: {0}")]
    DigestOnFolder(String),

    /// Version counters only move forward
    #[error("Version must not decrease (current {current}, attempted {attempted})")]
    VersionRegression {
        /// Version currently stored on the pair
        current: u64,
        /// Version the caller tried to set
        attempted: u64,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
