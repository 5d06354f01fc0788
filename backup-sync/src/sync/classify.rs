//! Per-path change classification.

use crate::fs::FileMetadata;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Default allowed drift between local and remote modification times.
/// Absorbs timestamp truncation between filesystems (FAT, SFTP v3 seconds).
pub const DEFAULT_TIME_TOLERANCE: Duration = Duration::from_secs(2);

/// What a run does to one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Absent remotely: copy it over
    Create,
    /// Content differs: back up the remote copy, then overwrite it
    Update,
    /// Same content, drifted timestamp: only reset the remote mtime
    RetouchTimestamp,
    /// Nothing to do
    NoOp,
    /// Present only remotely: back it up, then remove it
    Delete,
}

impl Action {
    /// Whether the action destroys remote content and so needs a backup first
    pub fn is_destructive(self) -> bool {
        matches!(self, Action::Update | Action::Delete)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::RetouchTimestamp => "retouch",
            Action::NoOp => "unchanged",
            Action::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// Decides create/update/retouch/no-op for a local file against its remote twin
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    tolerance: Duration,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_TOLERANCE)
    }
}

impl Classifier {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// True when the two times are at most `tolerance` apart, in either direction
    pub fn times_equal(&self, a: SystemTime, b: SystemTime) -> bool {
        let drift = match a.duration_since(b) {
            Ok(d) => d,
            Err(e) => e.duration(),
        };
        drift <= self.tolerance
    }

    /// Classify one local file.
    ///
    /// `content_equal` is only invoked when size or time disagree; it should
    /// fingerprint both sides. Its error is returned unchanged.
    pub fn classify<E, F>(
        &self,
        local: &FileMetadata,
        remote: Option<&FileMetadata>,
        content_equal: F,
    ) -> Result<Action, E>
    where
        F: FnOnce() -> Result<bool, E>,
    {
        let Some(remote) = remote else {
            return Ok(Action::Create);
        };

        let time_equal = self.times_equal(local.modified, remote.modified);
        let size_equal = local.size == remote.size;

        if time_equal && size_equal {
            return Ok(Action::NoOp);
        }

        if content_equal()? {
            Ok(Action::RetouchTimestamp)
        } else {
            Ok(Action::Update)
        }
    }
}
