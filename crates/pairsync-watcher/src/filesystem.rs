//! Local filesystem adapter
//!
//! Implements [`ILocalFileSystem`] over `tokio::fs` for the watched root.
//! All paths handed to callers are tree paths relative to the root, with
//! names NFC-normalized so lookups behave the same on volumes that store
//! decomposed names.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use pairsync_core::domain::newtypes::NodePath;
use pairsync_core::ports::local_filesystem::{ILocalFileSystem, LocalInfo};

use crate::events::normalize_name;

/// Suffix the transfer workers give in-flight downloads. Entries with it
/// are invisible to change detection.
pub const DOWNLOAD_TMP_SUFFIX: &str = ".nxpart";

const IGNORED_SUFFIXES: &[&str] = &["~", ".swp", ".lock", ".tmp", ".part", DOWNLOAD_TMP_SUFFIX];
const IGNORED_PREFIXES: &[&str] = &[".", "~$", "Icon\r"];

/// Filesystem access rooted at one watched directory.
pub struct LocalFileSystemAccessor {
    base: PathBuf,
}

impl LocalFileSystemAccessor {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Absolute path for a tree path.
    fn absolutize(&self, path: &NodePath) -> PathBuf {
        if path.is_root() {
            self.base.clone()
        } else {
            // Tree paths always start with '/', strip it for joining.
            self.base.join(&path.as_str()[1..])
        }
    }

    fn info_from_metadata(path: NodePath, meta: &std::fs::Metadata) -> LocalInfo {
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        LocalInfo {
            path,
            folderish: meta.is_dir(),
            last_modified,
            size: if meta.is_dir() { 0 } else { meta.len() },
        }
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAccessor {
    fn base_folder(&self) -> &Path {
        &self.base
    }

    async fn get_info(&self, path: &NodePath) -> Result<Option<LocalInfo>> {
        let abs = self.absolutize(path);
        match tokio::fs::metadata(&abs).await {
            Ok(meta) => Ok(Some(Self::info_from_metadata(path.clone(), &meta))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("stat failed: {}", abs.display())),
        }
    }

    async fn get_children_info(&self, path: &NodePath) -> Result<Option<Vec<LocalInfo>>> {
        let abs = self.absolutize(path);
        let mut dir = match tokio::fs::read_dir(&abs).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read_dir failed: {}", abs.display()))
            }
        };

        let mut children = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(e).with_context(|| format!("read_dir failed: {}", abs.display()))
                }
            };

            let raw_name = entry.file_name();
            let Some(name) = raw_name.to_str() else {
                tracing::warn!(parent = %path, "skipping entry with non-UTF-8 name");
                continue;
            };
            let name = normalize_name(name);
            if self.is_ignored(path, &name) {
                continue;
            }

            // An entry can vanish between listing and stat; skip it.
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(parent = %path, name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let child_path = path.join(&name)?;
            children.push(Self::info_from_metadata(child_path, &meta));
        }

        children.sort_by(|a, b| a.path.as_str().cmp(b.path.as_str()));
        Ok(Some(children))
    }

    async fn compute_digest(&self, path: &NodePath) -> Result<String> {
        let abs = self.absolutize(path);
        let bytes = tokio::fs::read(&abs)
            .await
            .with_context(|| format!("digest read failed: {}", abs.display()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(BASE64.encode(hasher.finalize()))
    }

    fn is_ignored(&self, _parent: &NodePath, name: &str) -> bool {
        IGNORED_PREFIXES.iter().any(|p| name.starts_with(p))
            || IGNORED_SUFFIXES.iter().any(|s| name.ends_with(s))
            || self.is_temp_file(name)
    }

    fn is_temp_file(&self, name: &str) -> bool {
        name.ends_with(DOWNLOAD_TMP_SUFFIX) || (name.starts_with('#') && name.ends_with('#'))
    }

    fn to_relative(&self, absolute: &Path) -> Result<NodePath> {
        let rel = match absolute.strip_prefix(&self.base) {
            Ok(rel) => rel,
            Err(_) => bail!(
                "path {} is outside watched root {}",
                absolute.display(),
                self.base.display()
            ),
        };
        if rel.as_os_str().is_empty() {
            return Ok(NodePath::root());
        }

        let mut tree = String::new();
        for comp in rel.components() {
            let Some(part) = comp.as_os_str().to_str() else {
                bail!("path {} has a non-UTF-8 component", absolute.display());
            };
            tree.push('/');
            tree.push_str(&normalize_name(part));
        }
        Ok(NodePath::new(tree)?)
    }
}
