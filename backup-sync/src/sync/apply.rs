//! Remote mutations for a single path.
//!
//! Each function performs one action's writes and reports the first failing
//! step. Nothing here takes backups; callers do that first.

use crate::fs::metadata::mode_bits;
use crate::remote::{self, RemoteFs};
use crate::utils::{ApplyStep, Result, SyncError};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

/// Copy a local file over `remote_path`, then mirror its permission bits and,
/// with `preserve_mtime`, its modification time.
///
/// # Returns
/// * `Ok(u64)` - Number of bytes written
pub fn upload(
    fs: &dyn RemoteFs,
    local_path: &Path,
    remote_path: &str,
    rel_path: &str,
    preserve_mtime: bool,
) -> Result<u64> {
    if let Some(parent) = remote::parent(remote_path) {
        fs.mkdir_all(parent)
            .map_err(|e| SyncError::apply(ApplyStep::CreateParent, rel_path, e))?;
    }

    let copy_err = |e| SyncError::apply(ApplyStep::CopyContent, rel_path, e);

    let mut source = File::open(local_path).map_err(copy_err)?;
    let local_meta = source.metadata().map_err(copy_err)?;

    let written = {
        let mut target = fs.create(remote_path).map_err(copy_err)?;
        let n = io::copy(&mut source, &mut target).map_err(copy_err)?;
        target.flush().map_err(copy_err)?;
        n
    };

    fs.set_permissions(remote_path, mode_bits(&local_meta))
        .map_err(|e| SyncError::apply(ApplyStep::SetPermissions, rel_path, e))?;

    if preserve_mtime {
        let modified = local_meta.modified().unwrap_or_else(|_| SystemTime::now());
        retouch(fs, remote_path, rel_path, modified)?;
    }

    Ok(written)
}

/// Set the remote mtime to `modified` and the atime to now
pub fn retouch(fs: &dyn RemoteFs, remote_path: &str, rel_path: &str, modified: SystemTime) -> Result<()> {
    fs.set_times(remote_path, SystemTime::now(), modified)
        .map_err(|e| SyncError::apply(ApplyStep::SetTimes, rel_path, e))
}

/// Remove the remote leaf file; parent directories stay
pub fn remove(fs: &dyn RemoteFs, remote_path: &str, rel_path: &str) -> Result<()> {
    fs.remove_file(remote_path)
        .map_err(|e| SyncError::apply(ApplyStep::Remove, rel_path, e))
}
