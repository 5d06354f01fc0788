//! Run-scoped backups of remote files.
//!
//! Before an update overwrites a remote file, or a delete removes one, the
//! current remote copy is written to `{backup_base}/{run_timestamp}/{rel_path}`.
//! The backup root is only created when the first file needs it.

use crate::remote::{self, RemoteFs};
use crate::utils::{Result, SyncError};
use chrono::{DateTime, Local};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sortable run timestamp, e.g. `20240131_235959`
pub fn run_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Result of the end-of-run cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Backups were written; the root stays
    Retained,
    /// Nothing was backed up and the root never existed
    NotCreated,
    /// Nothing was backed up and the empty root was removed
    Removed,
    /// Nothing was backed up but the root holds leftovers of a failed backup
    LeftNonEmpty,
    /// Removal failed for another reason
    Failed,
}

pub struct BackupManager {
    fs: Arc<dyn RemoteFs>,
    remote_root: String,
    backup_root: String,
    materialized: AtomicUsize,
}

impl BackupManager {
    pub fn new(fs: Arc<dyn RemoteFs>, remote_root: &str, backup_base: &str, run_timestamp: &str) -> Self {
        Self {
            fs,
            remote_root: remote_root.to_string(),
            backup_root: remote::join(backup_base, run_timestamp),
            materialized: AtomicUsize::new(0),
        }
    }

    pub fn backup_root(&self) -> &str {
        &self.backup_root
    }

    /// Number of files backed up so far in this run
    pub fn materialized(&self) -> usize {
        self.materialized.load(Ordering::SeqCst)
    }

    /// Copy the remote file at `rel_path` into the backup root.
    ///
    /// Returns the backup path. The caller must not touch the remote file if
    /// this fails.
    pub fn backup(&self, rel_path: &str) -> Result<String> {
        let source = remote::join(&self.remote_root, rel_path);
        let target = remote::join(&self.backup_root, rel_path);

        self.copy_with_permissions(&source, &target)
            .map_err(|e| SyncError::Backup {
                path: rel_path.to_string(),
                source: e,
            })?;

        self.materialized.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Backed up {} to {}", source, target);
        Ok(target)
    }

    fn copy_with_permissions(&self, source: &str, target: &str) -> io::Result<()> {
        if let Some(parent) = remote::parent(target) {
            self.fs.mkdir_all(parent)?;
        }

        {
            let mut reader = self.fs.open_read(source)?;
            let mut writer = self.fs.create(target)?;
            io::copy(&mut reader, &mut writer)?;
            writer.flush()?;
        }

        if let Some(mode) = self.fs.stat(source)?.permissions {
            self.fs.set_permissions(target, mode)?;
        }
        Ok(())
    }

    /// Remove the backup root if this run never wrote a backup into it.
    ///
    /// Never fails the run; problems are logged.
    pub fn cleanup(&self) -> CleanupOutcome {
        if self.materialized() > 0 {
            tracing::info!(
                "Kept backup directory {} ({} files)",
                self.backup_root,
                self.materialized()
            );
            return CleanupOutcome::Retained;
        }

        if self.fs.stat(&self.backup_root).is_err() {
            return CleanupOutcome::NotCreated;
        }

        match self.fs.remove_dir(&self.backup_root) {
            Ok(()) => {
                tracing::info!("Removed empty backup directory {}", self.backup_root);
                CleanupOutcome::Removed
            }
            Err(e) if self.has_entries() => {
                tracing::info!("Backup directory {} is not empty, leaving it: {}", self.backup_root, e);
                CleanupOutcome::LeftNonEmpty
            }
            Err(e) => {
                let err = SyncError::Cleanup {
                    path: self.backup_root.clone(),
                    source: e,
                };
                tracing::warn!("{}", err);
                CleanupOutcome::Failed
            }
        }
    }

    fn has_entries(&self) -> bool {
        self.fs
            .read_dir(&self.backup_root)
            .map(|entries| !entries.is_empty())
            .unwrap_or(false)
    }
}
