//! Target tree on a locally reachable filesystem (mounted share, second disk).

use super::{EntryKind, RemoteEntry, RemoteFs, RemoteStat};
use filetime::FileTime;
use std::fs;
use std::io::{self, Read, Write};
use std::time::SystemTime;

/// `RemoteFs` over plain filesystem calls; remote paths are local paths
pub struct LocalDirFs {
    name: String,
}

impl LocalDirFs {
    pub fn new() -> Self {
        Self {
            name: "local".to_string(),
        }
    }

    fn to_stat(metadata: &fs::Metadata) -> RemoteStat {
        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else if metadata.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        RemoteStat {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            permissions: Some(crate::fs::metadata::mode_bits(metadata)),
            kind,
        }
    }
}

impl Default for LocalDirFs {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteFs for LocalDirFs {
    fn open_read(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn create(&self, path: &str) -> io::Result<Box<dyn Write + '_>> {
        Ok(Box::new(fs::File::create(path)?))
    }

    fn stat(&self, path: &str) -> io::Result<RemoteStat> {
        Ok(Self::to_stat(&fs::metadata(path)?))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            // symlink_metadata keeps SFTP readdir semantics: links are not followed
            let metadata = fs::symlink_metadata(entry.path())?;
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                stat: Self::to_stat(&metadata),
            });
        }
        Ok(entries)
    }

    fn mkdir_all(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    #[cfg(unix)]
    fn set_permissions(&self, path: &str, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_permissions(&self, path: &str, mode: u32) -> io::Result<()> {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(mode & 0o222 == 0);
        fs::set_permissions(path, perms)
    }

    fn set_times(&self, path: &str, accessed: SystemTime, modified: SystemTime) -> io::Result<()> {
        filetime::set_file_times(
            path,
            FileTime::from_system_time(accessed),
            FileTime::from_system_time(modified),
        )
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &str) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
