//! File metadata and tree inventories.
//!
//! An inventory is a snapshot of one tree (local or remote) taken once per run:
//! relative path to size, modification time and permission bits. Only leaf
//! files are recorded.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Metadata recorded for a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: SystemTime,

    /// File permissions (Unix mode bits)
    pub permissions: Option<u32>,

    /// Is this a directory?
    pub is_dir: bool,
}

impl FileMetadata {
    /// Extract metadata from a local path, following symlinks
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_std(&fs::metadata(path)?))
    }

    pub fn from_std(metadata: &fs::Metadata) -> Self {
        Self {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            permissions: Some(mode_bits(metadata)),
            is_dir: metadata.is_dir(),
        }
    }
}

/// Permission bits of a local file.
#[cfg(unix)]
pub fn mode_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

/// Permission bits of a local file.
#[cfg(not(unix))]
pub fn mode_bits(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Snapshot of one tree, keyed by forward-slash relative path
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    files: HashMap<String, FileMetadata>,

    /// Set when part of the tree could not be read
    degraded: bool,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rel_path: impl Into<String>, metadata: FileMetadata) {
        self.files.insert(rel_path.into(), metadata);
    }

    pub fn get(&self, rel_path: &str) -> Option<&FileMetadata> {
        self.files.get(rel_path)
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.files.contains_key(rel_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileMetadata)> {
        self.files.iter()
    }

    /// Relative paths in lexical order
    pub fn sorted_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Paths present here but absent from `other`, in lexical order
    pub fn missing_from(&self, other: &Inventory) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .keys()
            .filter(|path| !other.contains(path))
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|m| m.size).sum()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn mark_degraded(&mut self) {
        self.degraded = true;
    }
}

/// Join the components of a relative path with `/`
pub fn normalize_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
