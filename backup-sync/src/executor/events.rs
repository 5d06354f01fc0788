//! Events emitted by a sync run.
//!
//! The executor never renders anything itself; it reports to an [`EventSink`].

use crate::sync::Action;
use std::fmt;

/// Run phases, in order. None is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Scanning,
    Comparing,
    ApplyingLocal,
    ApplyingDeletes,
    Cleanup,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Scanning => "scanning",
            RunPhase::Comparing => "comparing",
            RunPhase::ApplyingLocal => "applying local changes",
            RunPhase::ApplyingDeletes => "applying deletions",
            RunPhase::Cleanup => "cleanup",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// How the action for one path ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Result of processing one path
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// Relative path
    pub path: String,
    pub action: Action,
    pub outcome: Outcome,
    /// Bytes uploaded for this path
    pub bytes_transferred: u64,
    /// Backup path, when a backup was written
    pub backup: Option<String>,
}

impl FileEvent {
    pub fn success(path: &str, action: Action) -> Self {
        Self {
            path: path.to_string(),
            action,
            outcome: Outcome::Success,
            bytes_transferred: 0,
            backup: None,
        }
    }

    pub fn failed(path: &str, action: Action, reason: impl fmt::Display) -> Self {
        Self {
            path: path.to_string(),
            action,
            outcome: Outcome::Failed(reason.to_string()),
            bytes_transferred: 0,
            backup: None,
        }
    }
}

/// Monotonic progress counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Receiver of run events. Must not affect control flow.
pub trait EventSink: Send + Sync {
    fn on_phase(&self, _phase: RunPhase) {}

    /// Called once both inventories are known
    fn on_start(&self, _total_operations: usize) {}

    fn on_event(&self, event: &FileEvent, progress: Progress);

    /// Called once at the end of a run that did not abort
    fn on_complete(&self, _report: &super::SyncReport) {}
}
