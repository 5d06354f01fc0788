//! Custom error types for the sync engine.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which side of the mirror an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Step of a create/update/retouch that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStep {
    CreateParent,
    CopyContent,
    SetPermissions,
    SetTimes,
    Remove,
    Stat,
}

impl fmt::Display for ApplyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplyStep::CreateParent => "creating remote parent directory",
            ApplyStep::CopyContent => "copying content",
            ApplyStep::SetPermissions => "setting permissions",
            ApplyStep::SetTimes => "setting modification time",
            ApplyStep::Remove => "removing remote file",
            ApplyStep::Stat => "checking remote file",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Local scan failed at {}: {source}", path.display())]
    LocalScan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote scan failed at {path}: {source}")]
    RemoteScan {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Fingerprint of {side} file {path} failed: {source}")]
    Fingerprint {
        side: Side,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup of {path} failed: {source}")]
    Backup {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed {step} for {path}: {source}")]
    Apply {
        step: ApplyStep,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cleanup of {path} failed: {source}")]
    Cleanup {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn apply(step: ApplyStep, path: &str, source: std::io::Error) -> Self {
        SyncError::Apply {
            step,
            path: path.to_string(),
            source,
        }
    }

    /// Fatal errors abort the whole run; everything else is confined to one file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_)
                | SyncError::Connection(_)
                | SyncError::LocalScan { .. }
                | SyncError::RemoteScan { .. }
                | SyncError::Io(_)
                | SyncError::Task(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
