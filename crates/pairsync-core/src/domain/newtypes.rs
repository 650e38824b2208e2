//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers and paths that flow between
//! the watchers and the pair-state store. Each newtype validates its content
//! at construction time so the rest of the engine never re-checks formats.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// PairId
// ============================================================================

/// Opaque persisted identifier of a doc pair.
///
/// Assigned by the pair-state store on insert; never reused within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairId(u64);

impl PairId {
    /// Wraps a raw row id handed out by the store.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw row id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for PairId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// NodePath
// ============================================================================

/// A slash-separated path relative to the watched root.
///
/// The root itself is `"/"`; every other path starts with `/` and has no
/// trailing slash and no empty segments. This is the key the local watcher
/// uses for all store lookups, so the invariants here guarantee that two
/// sightings of the same file always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    /// The watched root.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Validates and wraps a relative tree path.
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();
        if path == "/" {
            return Ok(Self(path));
        }
        if !path.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "must start with '/': {path}"
            )));
        }
        if path.ends_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "trailing slash: {path}"
            )));
        }
        if path[1..].split('/').any(str::is_empty) {
            return Err(DomainError::InvalidPath(format!(
                "empty segment: {path}"
            )));
        }
        Ok(Self(path))
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the watched root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Final path segment; empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Parent path; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(NodePath::root()),
            Some(idx) => Some(NodePath(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Appends a child name to this path.
    pub fn join(&self, name: &str) -> Result<NodePath, DomainError> {
        if name.is_empty() || name.contains('/') {
            return Err(DomainError::InvalidPath(format!(
                "invalid child name: {name}"
            )));
        }
        if self.is_root() {
            NodePath::new(format!("/{name}"))
        } else {
            NodePath::new(format!("{}/{name}", self.0))
        }
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RemoteRef
// ============================================================================

/// Opaque identifier of an item in the remote hierarchy.
///
/// The server encodes these as `factory#...#docid`. The factory prefix can
/// change across delete/securityUpdated boundaries for the same underlying
/// document, which is why the store contract includes a relaxed lookup that
/// matches on the [`suffix`](RemoteRef::suffix) only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRef(String);

impl RemoteRef {
    /// Validates and wraps a remote reference.
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidRemoteRef("empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Factory prefix, i.e. everything before the first `#`.
    ///
    /// For references without a factory part, the whole string is returned.
    #[must_use]
    pub fn factory(&self) -> &str {
        self.0.split('#').next().unwrap_or(&self.0)
    }

    /// Factory-independent tail, i.e. everything after the first `#`.
    ///
    /// For references without a factory part, the whole string is returned.
    #[must_use]
    pub fn suffix(&self) -> &str {
        match self.0.find('#') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Relaxed comparison ignoring the factory prefix on both sides.
    #[must_use]
    pub fn matches_partial(&self, other: &RemoteRef) -> bool {
        self.suffix() == other.suffix()
    }
}

impl Display for RemoteRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_path_root() {
        let root = NodePath::root();
        assert!(root.is_root());
        assert_eq!(root.as_str(), "/");
        assert_eq!(root.name(), "");
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_node_path_rejects_relative() {
        assert!(NodePath::new("a/b").is_err());
        assert!(NodePath::new("/a/").is_err());
        assert!(NodePath::new("/a//b").is_err());
    }

    #[test]
    fn test_node_path_name_and_parent() {
        let p = NodePath::new("/docs/report.txt").unwrap();
        assert_eq!(p.name(), "report.txt");
        assert_eq!(p.parent().unwrap().as_str(), "/docs");
        assert_eq!(p.parent().unwrap().parent().unwrap().as_str(), "/");
    }

    #[test]
    fn test_node_path_join() {
        let root = NodePath::root();
        let a = root.join("a").unwrap();
        assert_eq!(a.as_str(), "/a");
        let b = a.join("b.txt").unwrap();
        assert_eq!(b.as_str(), "/a/b.txt");
        assert!(a.join("x/y").is_err());
        assert!(a.join("").is_err());
    }

    #[test]
    fn test_remote_ref_factory_and_suffix() {
        let r = RemoteRef::new("defaultFileSystemItemFactory#default#1234").unwrap();
        assert_eq!(r.factory(), "defaultFileSystemItemFactory");
        assert_eq!(r.suffix(), "default#1234");
    }

    #[test]
    fn test_remote_ref_partial_match_across_factories() {
        let a = RemoteRef::new("defaultFileSystemItemFactory#default#1234").unwrap();
        let b = RemoteRef::new("collectionSyncRootFolderItemFactory#default#1234").unwrap();
        assert!(a.matches_partial(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_remote_ref_without_factory() {
        let r = RemoteRef::new("plain-id").unwrap();
        assert_eq!(r.factory(), "plain-id");
        assert_eq!(r.suffix(), "plain-id");
    }

    #[test]
    fn test_remote_ref_rejects_empty() {
        assert!(RemoteRef::new("").is_err());
    }

    #[test]
    fn test_pair_id_roundtrip() {
        let id = PairId::from_raw(42);
        assert_eq!(id.as_u64(), 42);
        assert_eq!(id.to_string(), "42");
    }
}
