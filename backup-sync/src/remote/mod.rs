//! Remote filesystem capability.
//!
//! Everything the engine does to the target tree goes through [`RemoteFs`].
//! Paths are absolute remote paths with `/` separators.

pub mod local;
pub mod sftp;
pub mod walker;

use crate::fs::FileMetadata;
use std::io::{self, Read, Write};
use std::time::SystemTime;

pub use local::LocalDirFs;
pub use sftp::SftpFs;
pub use walker::scan_remote;

/// Kind of a remote entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// Attributes of a remote path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    pub modified: SystemTime,
    pub permissions: Option<u32>,
    pub kind: EntryKind,
}

impl RemoteStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn to_metadata(&self) -> FileMetadata {
        FileMetadata {
            size: self.size,
            modified: self.modified,
            permissions: self.permissions,
            is_dir: self.is_dir(),
        }
    }
}

/// One entry of a remote directory listing
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    /// Entry name (no directory part)
    pub name: String,
    pub stat: RemoteStat,
}

/// Blocking operations on the remote tree.
///
/// Implementations must tolerate concurrent calls on disjoint paths.
pub trait RemoteFs: Send + Sync {
    /// Open a file for reading
    fn open_read(&self, path: &str) -> io::Result<Box<dyn Read + '_>>;

    /// Create or truncate a file for writing
    fn create(&self, path: &str) -> io::Result<Box<dyn Write + '_>>;

    fn stat(&self, path: &str) -> io::Result<RemoteStat>;

    /// List a directory, without `.` and `..`
    fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteEntry>>;

    /// Create a directory and all missing parents; succeeds if it already exists
    fn mkdir_all(&self, path: &str) -> io::Result<()>;

    fn set_permissions(&self, path: &str, mode: u32) -> io::Result<()>;

    fn set_times(&self, path: &str, accessed: SystemTime, modified: SystemTime) -> io::Result<()>;

    fn remove_file(&self, path: &str) -> io::Result<()>;

    /// Remove an empty directory
    fn remove_dir(&self, path: &str) -> io::Result<()>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Join a remote base path and a relative path
pub fn join(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return rel.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

/// Parent of a remote path, `None` for top-level names and the root
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}
