//! Remote tree traversal.
//!
//! Unlike the local walk, an unreadable remote branch does not stop the scan by
//! default: it is logged, skipped, and the inventory is marked degraded.

use super::{join, RemoteFs};
use crate::fs::{Inventory, WalkOptions};
use crate::utils::{Result, SyncError};
use std::io;

/// Walk the remote tree under `root`.
///
/// A root that does not exist yet yields an empty inventory. With `strict`, any
/// listing failure is returned as [`SyncError::RemoteScan`].
pub fn scan_remote(
    fs: &dyn RemoteFs,
    root: &str,
    options: &WalkOptions,
    strict: bool,
) -> Result<Inventory> {
    let mut inventory = Inventory::new();
    walk(fs, root, "", options, strict, &mut inventory)?;
    Ok(inventory)
}

fn walk(
    fs: &dyn RemoteFs,
    root: &str,
    rel_dir: &str,
    options: &WalkOptions,
    strict: bool,
    inventory: &mut Inventory,
) -> Result<()> {
    let dir = join(root, rel_dir);
    let entries = match fs.read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if rel_dir.is_empty() && e.kind() == io::ErrorKind::NotFound => {
            tracing::info!("Remote directory {} does not exist yet", root);
            return Ok(());
        }
        Err(e) => return on_scan_error(inventory, &dir, e, strict),
    };

    for entry in entries {
        if options.is_excluded(&entry.name) {
            continue;
        }

        let rel_path = if rel_dir.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", rel_dir, entry.name)
        };

        if entry.stat.is_dir() {
            walk(fs, root, &rel_path, options, strict, inventory)?;
        } else {
            inventory.insert(rel_path, entry.stat.to_metadata());
        }
    }

    Ok(())
}

fn on_scan_error(inventory: &mut Inventory, path: &str, source: io::Error, strict: bool) -> Result<()> {
    if strict {
        return Err(SyncError::RemoteScan {
            path: path.to_string(),
            source,
        });
    }

    tracing::warn!("Cannot read remote directory {}: {} (continuing with a partial view)", path, source);
    inventory.mark_degraded();
    Ok(())
}
