// src/path_mapper.rs
//! Deterministic hash-to-path mapping.
//!
//! Grounded on the teacher's `filesystem/cas.rs::hash_to_path` (same
//! shard-prefix scheme, `objects/{first2}/{rest}`), adapted to the spec's
//! `<root>/<H[0:2]>/<H>` layout (full hash repeated in the leaf, not split).

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::hash::Hash;

/// A stat-like snapshot of a file on disk.
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub len: u64,
    pub accessed: SystemTime,
    pub modified: SystemTime,
    pub created: Option<SystemTime>,
}

/// Pure mapping from a content hash to its location within a tier root.
pub struct PathMapper;

impl PathMapper {
    /// `<root>/<H[0:2]>/<H>`
    pub fn path_for(root: &Path, hash: &Hash) -> PathBuf {
        root.join(hash.shard()).join(hash.as_str())
    }

    /// The transient staging path a fetch or promotion writes to before
    /// an atomic rename into place.
    pub fn staging_path_for(root: &Path, hash: &Hash) -> PathBuf {
        let mut path = Self::path_for(root, hash).into_os_string();
        path.push(".dl");
        PathBuf::from(path)
    }

    pub fn info_for(root: &Path, hash: &Hash) -> Option<FileInfo> {
        let meta = std::fs::metadata(Self::path_for(root, hash)).ok()?;
        Some(FileInfo {
            len: meta.len(),
            accessed: meta.accessed().ok()?,
            modified: meta.modified().ok()?,
            created: meta.created().ok(),
        })
    }
}
