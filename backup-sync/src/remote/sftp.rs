//! SFTP implementation of [`RemoteFs`] on top of `ssh2`.

use super::{EntryKind, RemoteEntry, RemoteFs, RemoteStat};
use crate::config::RemoteConfig;
use crate::utils::{Result, SyncError};
use ssh2::{ErrorCode, FileStat, MethodType, Session, Sftp};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// SFTP status codes (draft-ietf-secsh-filexfer-02 + libssh2 extensions)
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_SUCH_PATH: i32 = 10;
const FX_DIR_NOT_EMPTY: i32 = 18;

/// Live SFTP session shared by every file operation of a run
pub struct SftpFs {
    _session: Session,
    sftp: Mutex<Sftp>,
    name: String,
}

/// Open an authenticated SFTP session.
///
/// The timeout only covers TCP connect, handshake and authentication; once the
/// session is up, requests block until the server answers.
pub fn connect(config: &RemoteConfig) -> Result<SftpFs> {
    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let target = format!("{}:{}", config.host, config.port);

    let addr = target
        .to_socket_addrs()
        .map_err(|e| SyncError::Connection(format!("cannot resolve {}: {}", target, e)))?
        .next()
        .ok_or_else(|| SyncError::Connection(format!("no address for {}", target)))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| SyncError::Connection(format!("TCP connect to {} failed: {}", target, e)))?;

    let mut sess = Session::new()
        .map_err(|e| SyncError::Connection(format!("cannot create SSH session: {}", e)))?;
    sess.set_tcp_stream(tcp);
    sess.set_timeout(timeout_millis(timeout));

    if !config.host_key_algorithms.is_empty() {
        sess.method_pref(MethodType::HostKey, &config.host_key_algorithms.join(","))
            .map_err(|e| SyncError::Connection(format!("invalid host key algorithms: {}", e)))?;
    }

    sess.handshake()
        .map_err(|e| SyncError::Connection(format!("SSH handshake with {} failed: {}", target, e)))?;

    match (&config.private_key, &config.password) {
        (Some(key), _) => sess
            .userauth_pubkey_file(&config.user, None, key, config.passphrase.as_deref())
            .map_err(|e| SyncError::Connection(format!("SSH key authentication failed: {}", e)))?,
        (None, Some(password)) => sess
            .userauth_password(&config.user, password)
            .map_err(|e| SyncError::Connection(format!("SSH authentication failed: {}", e)))?,
        (None, None) => {
            return Err(SyncError::Connection(
                "no password or private key configured".to_string(),
            ))
        }
    }

    if !sess.authenticated() {
        return Err(SyncError::Connection("SSH authentication failed".to_string()));
    }

    let sftp = sess
        .sftp()
        .map_err(|e| SyncError::Connection(format!("cannot start SFTP subsystem: {}", e)))?;

    // 0 disables the timeout for the rest of the run
    sess.set_timeout(0);

    tracing::info!(host = %config.host, user = %config.user, "SFTP session established");

    Ok(SftpFs {
        _session: sess,
        sftp: Mutex::new(sftp),
        name: format!("sftp://{}@{}", config.user, target),
    })
}

impl SftpFs {
    fn sftp(&self) -> io::Result<MutexGuard<'_, Sftp>> {
        self.sftp
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "SFTP handle poisoned"))
    }

    fn setstat(&self, path: &str, stat: FileStat) -> io::Result<()> {
        self.sftp()?.setstat(Path::new(path), stat).map_err(to_io)
    }
}

impl RemoteFs for SftpFs {
    fn open_read(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        let file = self.sftp()?.open(Path::new(path)).map_err(to_io)?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &str) -> io::Result<Box<dyn Write + '_>> {
        let file = self.sftp()?.create(Path::new(path)).map_err(to_io)?;
        Ok(Box::new(file))
    }

    fn stat(&self, path: &str) -> io::Result<RemoteStat> {
        let stat = self.sftp()?.stat(Path::new(path)).map_err(to_io)?;
        Ok(to_stat(&stat))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteEntry>> {
        let listing = self.sftp()?.readdir(Path::new(path)).map_err(to_io)?;

        Ok(listing
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                if name == "." || name == ".." {
                    return None;
                }
                Some(RemoteEntry {
                    name,
                    stat: to_stat(&stat),
                })
            })
            .collect())
    }

    fn mkdir_all(&self, path: &str) -> io::Result<()> {
        let mut current = PathBuf::new();

        for component in Path::new(path).components() {
            match component {
                Component::RootDir => {
                    current.push("/");
                    continue;
                }
                Component::CurDir | Component::ParentDir | Component::Prefix(_) => continue,
                Component::Normal(part) => current.push(part),
            }

            let sftp = self.sftp()?;
            match sftp.stat(&current) {
                Ok(stat) if stat.is_dir() => continue,
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} exists and is not a directory", current.display()),
                    ))
                }
                Err(_) => {
                    if let Err(e) = sftp.mkdir(&current, 0o755) {
                        // Another worker may have created it in the meantime
                        if !sftp.stat(&current).map(|s| s.is_dir()).unwrap_or(false) {
                            return Err(to_io(e));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn set_permissions(&self, path: &str, mode: u32) -> io::Result<()> {
        self.setstat(
            path,
            FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: Some(mode),
                atime: None,
                mtime: None,
            },
        )
    }

    fn set_times(&self, path: &str, accessed: SystemTime, modified: SystemTime) -> io::Result<()> {
        self.setstat(
            path,
            FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: None,
                atime: Some(unix_secs(accessed)),
                mtime: Some(unix_secs(modified)),
            },
        )
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        self.sftp()?.unlink(Path::new(path)).map_err(to_io)
    }

    fn remove_dir(&self, path: &str) -> io::Result<()> {
        self.sftp()?.rmdir(Path::new(path)).map_err(to_io)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn to_stat(stat: &FileStat) -> RemoteStat {
    let kind = if stat.is_dir() {
        EntryKind::Directory
    } else if stat.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };

    RemoteStat {
        size: stat.size.unwrap_or(0),
        modified: stat
            .mtime
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap_or(UNIX_EPOCH),
        permissions: stat.perm.map(|p| p & 0o7777),
        kind,
    }
}

/// Session timeout in milliseconds, saturating at `u32::MAX`
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn to_io(err: ssh2::Error) -> io::Error {
    let kind = match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => {
            io::ErrorKind::NotFound
        }
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => io::ErrorKind::PermissionDenied,
        ErrorCode::SFTP(FX_DIR_NOT_EMPTY) => {
            return io::Error::new(io::ErrorKind::Other, format!("directory not empty: {}", err))
        }
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}
