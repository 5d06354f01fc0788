//! Sync executor - Orchestrates one reconciliation run.
//!
//! This module ties together:
//! - Local and remote tree scans
//! - Per-path classification (metadata first, fingerprints when needed)
//! - Backups before every overwrite or delete
//! - Event emission for progress and logging
//!
//! A run is a single linear pass: scan, compare, apply local changes, apply
//! deletions, clean up. Per-file work runs on the blocking pool, bounded by
//! `max_concurrency`.

pub mod events;

#[cfg(test)]
mod tests;

use crate::fs::{scan_local, FileMetadata, Inventory, WalkOptions};
use crate::remote::{self, scan_remote, RemoteFs};
use crate::sync::{
    apply, fingerprint_local, fingerprint_remote, run_timestamp, Action, BackupManager, Classifier,
    CleanupOutcome, DEFAULT_TIME_TOLERANCE,
};
use crate::utils::{ApplyStep, Result, Side, SyncError};
use events::{EventSink, FileEvent, Progress, RunPhase};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Parameters of one run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Local tree (the authority)
    pub local_root: PathBuf,

    /// Remote tree to bring in line with the local one
    pub remote_root: String,

    /// Remote directory holding one backup directory per run
    pub backup_base: String,

    /// Name of this run's backup directory
    pub run_timestamp: String,

    /// Allowed mtime drift before content is compared
    pub time_tolerance: Duration,

    /// Maximum files processed at once
    pub max_concurrency: usize,

    /// Treat unreadable remote directories as fatal
    pub strict_remote_scan: bool,

    /// Copy the local mtime onto created and updated files
    pub preserve_mtime: bool,

    /// Entry names skipped on both sides
    pub exclude: Vec<String>,
}

impl SyncOptions {
    pub fn new(local_root: impl Into<PathBuf>, remote_root: &str, backup_base: &str) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: remote_root.to_string(),
            backup_base: backup_base.to_string(),
            run_timestamp: run_timestamp(chrono::Local::now()),
            time_tolerance: DEFAULT_TIME_TOLERANCE,
            max_concurrency: 1,
            strict_remote_scan: false,
            preserve_mtime: true,
            exclude: Vec::new(),
        }
    }
}

/// Sync execution result
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub total_operations: usize,
    pub created: usize,
    pub updated: usize,
    pub retouched: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Files copied into the backup root
    pub backups: usize,
    pub bytes_transferred: u64,
    pub backup_root: String,
    /// Whether the backup root still exists after cleanup
    pub backup_root_retained: bool,
    pub remote_scan_degraded: bool,
    pub duration: Duration,
}

impl SyncReport {
    fn record(&mut self, event: &FileEvent) {
        self.bytes_transferred += event.bytes_transferred;

        if !event.outcome.is_success() {
            self.failed += 1;
            return;
        }

        match event.action {
            Action::Create => self.created += 1,
            Action::Update => self.updated += 1,
            Action::RetouchTimestamp => self.retouched += 1,
            Action::NoOp => self.unchanged += 1,
            Action::Delete => self.deleted += 1,
        }
    }

    /// Number of paths that ended in an error
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// State shared by every per-file task of a run
struct RunContext {
    fs: Arc<dyn RemoteFs>,
    options: SyncOptions,
    classifier: Classifier,
    backups: BackupManager,
    /// Remote inventory is partial; absent paths must be confirmed
    remote_degraded: bool,
}

impl RunContext {
    /// Classify and apply one local path
    fn process_local(&self, rel_path: &str, local: &FileMetadata, remote: Option<FileMetadata>) -> FileEvent {
        let local_path = self.options.local_root.join(rel_path);
        let remote_path = remote::join(&self.options.remote_root, rel_path);

        let remote = match remote {
            Some(meta) => Some(meta),
            None if self.remote_degraded => match self.confirm_absent(rel_path, &remote_path) {
                Ok(meta) => meta,
                Err(e) => return FileEvent::failed(rel_path, Action::Create, e),
            },
            None => None,
        };

        let classified = self.classifier.classify(local, remote.as_ref(), || {
            let local_fp = fingerprint_local(&local_path).map_err(|e| SyncError::Fingerprint {
                side: Side::Local,
                path: rel_path.to_string(),
                source: e,
            })?;
            let remote_fp = fingerprint_remote(self.fs.as_ref(), &remote_path).map_err(|e| {
                SyncError::Fingerprint {
                    side: Side::Remote,
                    path: rel_path.to_string(),
                    source: e,
                }
            })?;
            Ok::<_, SyncError>(local_fp == remote_fp)
        });

        let action = match classified {
            Ok(action) => action,
            // Nothing is touched; counted like an unchanged file
            Err(e) => return FileEvent::failed(rel_path, Action::NoOp, e),
        };

        let mut event = FileEvent::success(rel_path, action);

        let result = match action {
            Action::NoOp => Ok(()),
            Action::RetouchTimestamp => {
                apply::retouch(self.fs.as_ref(), &remote_path, rel_path, local.modified)
            }
            Action::Create | Action::Update => {
                if action.is_destructive() {
                    match self.backups.backup(rel_path) {
                        Ok(backup) => event.backup = Some(backup),
                        Err(e) => return FileEvent::failed(rel_path, action, e),
                    }
                }
                apply::upload(
                    self.fs.as_ref(),
                    &local_path,
                    &remote_path,
                    rel_path,
                    self.options.preserve_mtime,
                )
                .map(|bytes| event.bytes_transferred = bytes)
            }
            Action::Delete => Ok(()),
        };

        if let Err(e) = result {
            let backup = event.backup.take();
            event = FileEvent::failed(rel_path, action, e);
            event.backup = backup;
        }
        event
    }

    /// Back up and remove a remote-only path
    fn process_delete(&self, rel_path: &str) -> FileEvent {
        let remote_path = remote::join(&self.options.remote_root, rel_path);

        let backup = match self.backups.backup(rel_path) {
            Ok(backup) => backup,
            Err(e) => return FileEvent::failed(rel_path, Action::Delete, e),
        };

        let mut event = match apply::remove(self.fs.as_ref(), &remote_path, rel_path) {
            Ok(()) => FileEvent::success(rel_path, Action::Delete),
            Err(e) => FileEvent::failed(rel_path, Action::Delete, e),
        };
        event.backup = Some(backup);
        event
    }

    /// Stat a path the remote scan did not report
    fn confirm_absent(&self, rel_path: &str, remote_path: &str) -> Result<Option<FileMetadata>> {
        match self.fs.stat(remote_path) {
            Ok(stat) if stat.is_dir() => Err(SyncError::apply(
                ApplyStep::Stat,
                rel_path,
                io::Error::new(io::ErrorKind::AlreadyExists, "remote path is a directory"),
            )),
            Ok(stat) => Ok(Some(stat.to_metadata())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::apply(ApplyStep::Stat, rel_path, e)),
        }
    }
}

/// Main sync executor
pub struct SyncExecutor {
    fs: Arc<dyn RemoteFs>,
    options: SyncOptions,
    sink: Arc<dyn EventSink>,
}

impl SyncExecutor {
    pub fn new(fs: Arc<dyn RemoteFs>, options: SyncOptions, sink: Arc<dyn EventSink>) -> Self {
        Self { fs, options, sink }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Execute one run.
    ///
    /// Returns `Err` only for fatal errors (local scan, strict remote scan).
    /// Per-file failures are reported through the sink and counted in the
    /// report.
    pub async fn run(&self) -> Result<SyncReport> {
        let start_time = Instant::now();

        info!(
            "Starting sync {} -> {} on {} (backup dir: {}, concurrency: {})",
            self.options.local_root.display(),
            self.options.remote_root,
            self.fs.name(),
            remote::join(&self.options.backup_base, &self.options.run_timestamp),
            self.options.max_concurrency
        );

        self.enter(RunPhase::Scanning);
        let (local, remote) = self.scan().await?;
        info!(
            "Scanned {} local files ({} bytes), {} remote files{}",
            local.len(),
            local.total_bytes(),
            remote.len(),
            if remote.is_degraded() { " (partial view)" } else { "" }
        );

        self.enter(RunPhase::Comparing);
        let remote_only = remote.missing_from(&local);
        let total = local.len() + remote_only.len();
        self.sink.on_start(total);

        let ctx = Arc::new(RunContext {
            fs: Arc::clone(&self.fs),
            options: self.options.clone(),
            classifier: Classifier::new(self.options.time_tolerance),
            backups: BackupManager::new(
                Arc::clone(&self.fs),
                &self.options.remote_root,
                &self.options.backup_base,
                &self.options.run_timestamp,
            ),
            remote_degraded: remote.is_degraded(),
        });

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut report = SyncReport {
            total_operations: total,
            backup_root: ctx.backups.backup_root().to_string(),
            remote_scan_degraded: remote.is_degraded(),
            ..SyncReport::default()
        };

        self.enter(RunPhase::ApplyingLocal);
        let mut entries: Vec<(String, FileMetadata)> = local
            .iter()
            .map(|(path, meta)| (path.clone(), meta.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut handles = Vec::with_capacity(entries.len());
        for (rel_path, local_meta) in entries {
            let remote_meta = remote.get(&rel_path).cloned();
            let task_ctx = Arc::clone(&ctx);
            handles.push(
                self.spawn_unit(&semaphore, &completed, total, move || {
                    task_ctx.process_local(&rel_path, &local_meta, remote_meta)
                })
                .await?,
            );
        }
        self.collect(handles, &mut report).await;

        self.enter(RunPhase::ApplyingDeletes);
        let mut handles = Vec::with_capacity(remote_only.len());
        for rel_path in remote_only {
            let task_ctx = Arc::clone(&ctx);
            handles.push(
                self.spawn_unit(&semaphore, &completed, total, move || {
                    task_ctx.process_delete(&rel_path)
                })
                .await?,
            );
        }
        self.collect(handles, &mut report).await;

        self.enter(RunPhase::Cleanup);
        let cleanup_ctx = Arc::clone(&ctx);
        let outcome = tokio::task::spawn_blocking(move || cleanup_ctx.backups.cleanup()).await?;
        report.backups = ctx.backups.materialized();
        report.backup_root_retained = !matches!(
            outcome,
            CleanupOutcome::NotCreated | CleanupOutcome::Removed
        );

        report.duration = start_time.elapsed();
        self.enter(RunPhase::Done);

        info!(
            "Sync completed: {} created, {} updated, {} retouched, {} unchanged, {} deleted, {} failed, {} backed up, {}s",
            report.created,
            report.updated,
            report.retouched,
            report.unchanged,
            report.deleted,
            report.failed,
            report.backups,
            report.duration.as_secs()
        );

        self.sink.on_complete(&report);
        Ok(report)
    }

    async fn scan(&self) -> Result<(Inventory, Inventory)> {
        let walk_options = WalkOptions::with_excludes(self.options.exclude.clone());

        // Use blocking tasks for the directory walks
        let local_root = self.options.local_root.clone();
        let local_walk = walk_options.clone();
        let local = tokio::task::spawn_blocking(move || scan_local(&local_root, &local_walk)).await??;

        let fs = Arc::clone(&self.fs);
        let remote_root = self.options.remote_root.clone();
        let strict = self.options.strict_remote_scan;
        let remote = tokio::task::spawn_blocking(move || {
            scan_remote(fs.as_ref(), &remote_root, &walk_options, strict)
        })
        .await??;

        Ok((local, remote))
    }

    /// Wait for a permit, then run `unit` on the blocking pool and report its event
    async fn spawn_unit<F>(
        &self,
        semaphore: &Arc<Semaphore>,
        completed: &Arc<AtomicUsize>,
        total: usize,
        unit: F,
    ) -> Result<JoinHandle<FileEvent>>
    where
        F: FnOnce() -> FileEvent + Send + 'static,
    {
        let permit = Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map_err(|e| SyncError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        let sink = Arc::clone(&self.sink);
        let completed = Arc::clone(completed);

        Ok(tokio::task::spawn_blocking(move || {
            let event = unit();
            drop(permit);
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            sink.on_event(&event, Progress { completed: done, total });
            event
        }))
    }

    async fn collect(&self, handles: Vec<JoinHandle<FileEvent>>, report: &mut SyncReport) {
        for handle in handles {
            match handle.await {
                Ok(event) => report.record(&event),
                Err(e) => {
                    warn!("File task panicked: {}", e);
                    report.failed += 1;
                }
            }
        }
    }

    fn enter(&self, phase: RunPhase) {
        tracing::debug!(%phase, "Entering phase");
        self.sink.on_phase(phase);
    }
}
