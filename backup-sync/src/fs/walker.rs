//! Local directory traversal.
//!
//! The local tree is the authority for a run, so the walk fails fast: the first
//! entry that cannot be read aborts the scan.

use super::metadata::{normalize_relative, FileMetadata, Inventory};
use crate::utils::{Result, SyncError};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links to directories
    pub follow_links: bool,

    /// Entry names to skip (a matching directory is skipped with its subtree)
    pub exclude_patterns: Vec<String>,
}

impl WalkOptions {
    pub fn with_excludes(exclude_patterns: Vec<String>) -> Self {
        Self {
            follow_links: false,
            exclude_patterns,
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude_patterns.iter().any(|p| p == name)
    }
}

/// Walk `root` and record every file under it.
///
/// Symlinks to files are resolved to their target; symlinks to directories and
/// broken symlinks are skipped.
///
/// # Example
/// ```no_run
/// use backup_sync::fs::walker::{scan_local, WalkOptions};
/// use std::path::Path;
///
/// let inventory = scan_local(Path::new("/srv/site"), &WalkOptions::default()).unwrap();
/// println!("Found {} files", inventory.len());
/// ```
pub fn scan_local(root: &Path, options: &WalkOptions) -> Result<Inventory> {
    check_root(root)?;
    let mut inventory = Inventory::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !should_exclude(entry, options));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            SyncError::LocalScan {
                path,
                source: e.into(),
            }
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        if let Some((rel_path, metadata)) = file_entry(&entry, root)? {
            inventory.insert(rel_path, metadata);
        }
    }

    Ok(inventory)
}

/// The root must be an existing directory
fn check_root(root: &Path) -> Result<()> {
    let metadata = std::fs::metadata(root).map_err(|source| SyncError::LocalScan {
        path: root.to_path_buf(),
        source,
    })?;

    if !metadata.is_dir() {
        return Err(SyncError::LocalScan {
            path: root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        });
    }
    Ok(())
}

fn file_entry(entry: &DirEntry, root: &Path) -> Result<Option<(String, FileMetadata)>> {
    let path = entry.path();
    let scan_err = |source| SyncError::LocalScan {
        path: path.to_path_buf(),
        source,
    };

    let metadata = if entry.path_is_symlink() {
        match std::fs::metadata(path) {
            Ok(resolved) if resolved.is_dir() => return Ok(None),
            Ok(resolved) => resolved,
            Err(_) => {
                tracing::debug!("Skipping broken symlink {}", path.display());
                return Ok(None);
            }
        }
    } else {
        entry.metadata().map_err(|e| scan_err(e.into()))?
    };

    let relative: PathBuf = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    Ok(Some((
        normalize_relative(&relative),
        FileMetadata::from_std(&metadata),
    )))
}

fn should_exclude(entry: &DirEntry, options: &WalkOptions) -> bool {
    options.is_excluded(&entry.file_name().to_string_lossy())
}
