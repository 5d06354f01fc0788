//! Reconciliation building blocks: fingerprints, classification, backups and
//! the remote writes each action performs.

pub mod apply;
pub mod backup;
pub mod classify;
pub mod fingerprint;

pub use backup::{run_timestamp, BackupManager, CleanupOutcome};
pub use classify::{Action, Classifier, DEFAULT_TIME_TOLERANCE};
pub use fingerprint::{fingerprint, fingerprint_local, fingerprint_remote};
