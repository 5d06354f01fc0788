use super::events::{EventSink, FileEvent, Outcome, Progress, RunPhase};
use super::*;
use crate::remote::{LocalDirFs, RemoteEntry, RemoteStat};
use filetime::FileTime;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use tempfile::TempDir;

const T: u64 = 1_700_000_000;
const RUN: &str = "20240101_120000";

fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

fn write_file(path: &Path, content: &[u8], mtime: SystemTime) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    filetime::set_file_mtime(path, FileTime::from_system_time(mtime)).unwrap();
}

fn mtime(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

#[derive(Default)]
struct RecordingSink {
    phases: Mutex<Vec<RunPhase>>,
    started: Mutex<Option<usize>>,
    events: Mutex<Vec<(FileEvent, Progress)>>,
    completed: Mutex<Option<SyncReport>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<(FileEvent, Progress)> {
        self.events.lock().unwrap().clone()
    }

    fn event_for(&self, path: &str) -> FileEvent {
        self.events()
            .into_iter()
            .map(|(e, _)| e)
            .find(|e| e.path == path)
            .unwrap_or_else(|| panic!("no event for {}", path))
    }
}

impl EventSink for RecordingSink {
    fn on_phase(&self, phase: RunPhase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn on_start(&self, total_operations: usize) {
        *self.started.lock().unwrap() = Some(total_operations);
    }

    fn on_event(&self, event: &FileEvent, progress: Progress) {
        self.events.lock().unwrap().push((event.clone(), progress));
    }

    fn on_complete(&self, report: &SyncReport) {
        *self.completed.lock().unwrap() = Some(report.clone());
    }
}

/// `LocalDirFs` that fails selected operations for paths ending in a suffix
#[derive(Default)]
struct FaultyFs {
    inner: LocalDirFs,
    fail_open_read: Vec<String>,
    fail_create: Vec<String>,
    fail_read_dir: Vec<String>,
    fail_set_permissions: Vec<String>,
    fail_set_times: Vec<String>,
    fail_remove: Vec<String>,
}

fn injected(path: &str, suffixes: &[String]) -> io::Result<()> {
    if suffixes.iter().any(|s| path.ends_with(s.as_str())) {
        return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"));
    }
    Ok(())
}

impl RemoteFs for FaultyFs {
    fn open_read(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        injected(path, &self.fail_open_read)?;
        self.inner.open_read(path)
    }

    fn create(&self, path: &str) -> io::Result<Box<dyn Write + '_>> {
        injected(path, &self.fail_create)?;
        self.inner.create(path)
    }

    fn stat(&self, path: &str) -> io::Result<RemoteStat> {
        self.inner.stat(path)
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteEntry>> {
        injected(path, &self.fail_read_dir)?;
        self.inner.read_dir(path)
    }

    fn mkdir_all(&self, path: &str) -> io::Result<()> {
        self.inner.mkdir_all(path)
    }

    fn set_permissions(&self, path: &str, mode: u32) -> io::Result<()> {
        injected(path, &self.fail_set_permissions)?;
        self.inner.set_permissions(path, mode)
    }

    fn set_times(&self, path: &str, accessed: SystemTime, modified: SystemTime) -> io::Result<()> {
        injected(path, &self.fail_set_times)?;
        self.inner.set_times(path, accessed, modified)
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        injected(path, &self.fail_remove)?;
        self.inner.remove_file(path)
    }

    fn remove_dir(&self, path: &str) -> io::Result<()> {
        self.inner.remove_dir(path)
    }

    fn name(&self) -> &str {
        "faulty"
    }
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("local")).unwrap();
        fs::create_dir(dir.path().join("remote")).unwrap();
        Self { dir }
    }

    fn local(&self, rel: &str) -> PathBuf {
        self.dir.path().join("local").join(rel)
    }

    fn remote(&self, rel: &str) -> PathBuf {
        self.dir.path().join("remote").join(rel)
    }

    fn backup(&self, run: &str, rel: &str) -> PathBuf {
        self.dir.path().join("backups").join(run).join(rel)
    }

    fn options(&self, run: &str) -> SyncOptions {
        let mut options = SyncOptions::new(
            self.dir.path().join("local"),
            &self.dir.path().join("remote").to_string_lossy(),
            &self.dir.path().join("backups").to_string_lossy(),
        );
        options.run_timestamp = run.to_string();
        options
    }

    async fn run_with(&self, fs: Arc<dyn RemoteFs>, options: SyncOptions) -> (Result<SyncReport>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let executor = SyncExecutor::new(fs, options, sink.clone());
        (executor.run().await, sink)
    }

    async fn run(&self, run: &str) -> (SyncReport, Arc<RecordingSink>) {
        let (result, sink) = self.run_with(Arc::new(LocalDirFs::new()), self.options(run)).await;
        (result.expect("run should succeed"), sink)
    }
}

#[tokio::test]
async fn test_create_into_empty_remote() {
    let f = Fixture::new();
    write_file(&f.local("a.txt"), b"hello", at(T));
    write_file(&f.local("nested/dir/b.txt"), b"world!", at(T));

    let (report, sink) = f.run(RUN).await;

    assert_eq!(report.total_operations, 2);
    assert_eq!(report.created, 2);
    assert_eq!(report.bytes_transferred, 11);
    assert_eq!(fs::read(f.remote("nested/dir/b.txt")).unwrap(), b"world!");
    assert_eq!(mtime(&f.remote("a.txt")), at(T));

    assert_eq!(sink.event_for("a.txt").action, Action::Create);
    assert!(!report.backup_root_retained);
    assert!(!f.backup(RUN, "").exists());
}

#[tokio::test]
async fn test_update_backs_up_previous_content() {
    let f = Fixture::new();
    write_file(&f.local("x.txt"), b"Y is longer", at(T));
    write_file(&f.remote("x.txt"), b"X", at(T - 60));

    let (report, sink) = f.run(RUN).await;

    assert_eq!(report.updated, 1);
    assert_eq!(report.backups, 1);
    assert!(report.backup_root_retained);
    assert_eq!(fs::read(f.remote("x.txt")).unwrap(), b"Y is longer");
    assert_eq!(fs::read(f.backup(RUN, "x.txt")).unwrap(), b"X");

    let event = sink.event_for("x.txt");
    assert_eq!(event.action, Action::Update);
    assert_eq!(event.outcome, Outcome::Success);
    assert_eq!(
        event.backup.as_deref().map(PathBuf::from),
        Some(f.backup(RUN, "x.txt"))
    );
}

#[tokio::test]
async fn test_time_drift_only_retouches() {
    let f = Fixture::new();
    write_file(&f.local("same.txt"), b"identical", at(T));
    write_file(&f.remote("same.txt"), b"identical", at(T + 5));

    let (report, sink) = f.run(RUN).await;

    assert_eq!(report.retouched, 1);
    assert_eq!(report.bytes_transferred, 0);
    assert_eq!(sink.event_for("same.txt").action, Action::RetouchTimestamp);
    assert_eq!(mtime(&f.remote("same.txt")), at(T));
    assert!(!f.backup(RUN, "").exists());
}

#[tokio::test]
async fn test_drift_within_tolerance_is_noop() {
    let f = Fixture::new();
    write_file(&f.local("same.txt"), b"identical", at(T));
    write_file(&f.remote("same.txt"), b"identical", at(T + 2));

    let (report, _) = f.run(RUN).await;

    assert_eq!(report.unchanged, 1);
    assert_eq!(mtime(&f.remote("same.txt")), at(T + 2));
}

#[tokio::test]
async fn test_remote_only_file_is_backed_up_and_deleted() {
    let f = Fixture::new();
    write_file(&f.local("keep.txt"), b"keep", at(T));
    write_file(&f.remote("keep.txt"), b"keep", at(T));
    write_file(&f.remote("old/stale.txt"), b"stale", at(T));

    let (report, sink) = f.run(RUN).await;

    assert_eq!(report.total_operations, 2);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.deleted, 1);
    assert!(!f.remote("old/stale.txt").exists());
    assert!(f.remote("old").is_dir());
    assert_eq!(fs::read(f.backup(RUN, "old/stale.txt")).unwrap(), b"stale");
    assert_eq!(sink.event_for("old/stale.txt").action, Action::Delete);

    // the deleted file stays deleted
    let (second, _) = f.run("20240101_130000").await;
    assert_eq!(second.total_operations, 1);
    assert_eq!(second.deleted, 0);
    assert!(!f.remote("old/stale.txt").exists());
    assert!(!f.backup("20240101_130000", "").exists());
}

#[tokio::test]
async fn test_second_run_is_all_noop() {
    let f = Fixture::new();
    write_file(&f.local("a.txt"), b"alpha", at(T));
    write_file(&f.local("b/c.txt"), b"gamma", at(T + 10));
    write_file(&f.remote("a.txt"), b"old alpha", at(T - 100));
    write_file(&f.remote("gone.txt"), b"bye", at(T));

    let (first, _) = f.run(RUN).await;
    assert_eq!(first.created + first.updated + first.deleted, 3);

    let (second, sink) = f.run("20240101_130000").await;
    assert_eq!(second.total_operations, 2);
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.backups, 0);
    assert!(sink.events().iter().all(|(e, _)| e.action == Action::NoOp));
    assert!(!f.backup("20240101_130000", "").exists());
}

#[tokio::test]
async fn test_phases_and_progress() {
    let f = Fixture::new();
    write_file(&f.local("a.txt"), b"a", at(T));
    write_file(&f.remote("z.txt"), b"z", at(T));

    let (report, sink) = f.run(RUN).await;

    assert_eq!(
        *sink.phases.lock().unwrap(),
        vec![
            RunPhase::Scanning,
            RunPhase::Comparing,
            RunPhase::ApplyingLocal,
            RunPhase::ApplyingDeletes,
            RunPhase::Cleanup,
            RunPhase::Done,
        ]
    );
    assert_eq!(*sink.started.lock().unwrap(), Some(2));

    // local paths are applied before deletions
    let events = sink.events();
    assert_eq!(events[0].0.path, "a.txt");
    assert_eq!(events[0].1, Progress { completed: 1, total: 2 });
    assert_eq!(events[1].0.path, "z.txt");
    assert_eq!(events[1].1, Progress { completed: 2, total: 2 });

    let completed = sink.completed.lock().unwrap().clone().unwrap();
    assert_eq!(completed.deleted, report.deleted);
}

#[tokio::test]
async fn test_failed_backup_leaves_remote_untouched() {
    let f = Fixture::new();
    write_file(&f.local("x.txt"), b"new and longer", at(T));
    write_file(&f.remote("x.txt"), b"old", at(T - 60));
    write_file(&f.remote("orphan.txt"), b"orphan", at(T));

    let faulty = FaultyFs {
        fail_create: vec![format!("{}/x.txt", RUN), format!("{}/orphan.txt", RUN)],
        ..FaultyFs::default()
    };
    let (result, sink) = f.run_with(Arc::new(faulty), f.options(RUN)).await;
    let report = result.unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(report.backups, 0);
    assert_eq!(fs::read(f.remote("x.txt")).unwrap(), b"old");
    assert!(f.remote("orphan.txt").exists());

    let event = sink.event_for("x.txt");
    assert_eq!(event.action, Action::Update);
    assert!(matches!(event.outcome, Outcome::Failed(ref reason) if reason.contains("Backup")));

    // the root was created for the failed attempts, then removed as empty
    assert!(!report.backup_root_retained);
    assert!(!f.backup(RUN, "").exists());
}

#[tokio::test]
async fn test_failed_overwrite_keeps_backup() {
    let f = Fixture::new();
    write_file(&f.local("x.txt"), b"new and longer", at(T));
    write_file(&f.remote("x.txt"), b"old", at(T - 60));
    write_file(&f.local("sibling.txt"), b"sibling", at(T));

    let faulty = FaultyFs {
        fail_create: vec!["remote/x.txt".to_string()],
        ..FaultyFs::default()
    };
    let (result, sink) = f.run_with(Arc::new(faulty), f.options(RUN)).await;
    let report = result.unwrap();

    let event = sink.event_for("x.txt");
    assert_eq!(event.action, Action::Update);
    assert!(matches!(event.outcome, Outcome::Failed(ref reason) if reason.contains("copying content")));
    assert_eq!(event.backup.as_deref().map(PathBuf::from), Some(f.backup(RUN, "x.txt")));

    assert_eq!(fs::read(f.remote("x.txt")).unwrap(), b"old");
    assert_eq!(fs::read(f.backup(RUN, "x.txt")).unwrap(), b"old");
    assert!(report.backup_root_retained);
    assert_eq!(report.backups, 1);
    assert_eq!(report.failed, 1);

    assert!(sink.event_for("sibling.txt").outcome.is_success());
    assert_eq!(fs::read(f.remote("sibling.txt")).unwrap(), b"sibling");
}

#[tokio::test]
async fn test_failed_permission_copy_is_reported() {
    let f = Fixture::new();
    write_file(&f.local("x.txt"), b"new and longer", at(T));
    write_file(&f.remote("x.txt"), b"old", at(T - 60));
    write_file(&f.local("sibling.txt"), b"sibling", at(T));

    let faulty = FaultyFs {
        fail_set_permissions: vec!["remote/x.txt".to_string()],
        ..FaultyFs::default()
    };
    let (result, sink) = f.run_with(Arc::new(faulty), f.options(RUN)).await;
    let report = result.unwrap();

    let event = sink.event_for("x.txt");
    assert!(matches!(event.outcome, Outcome::Failed(ref reason) if reason.contains("setting permissions")));
    assert!(event.backup.is_some());
    assert_eq!(fs::read(f.backup(RUN, "x.txt")).unwrap(), b"old");
    assert!(report.backup_root_retained);
    assert_eq!(report.failed, 1);
    assert_eq!(report.created, 1);
}

#[tokio::test]
async fn test_failed_retouch_is_reported() {
    let f = Fixture::new();
    write_file(&f.local("same.txt"), b"identical", at(T));
    write_file(&f.remote("same.txt"), b"identical", at(T + 5));
    write_file(&f.local("sibling.txt"), b"sibling", at(T));

    let faulty = FaultyFs {
        fail_set_times: vec!["remote/same.txt".to_string()],
        ..FaultyFs::default()
    };
    let (result, sink) = f.run_with(Arc::new(faulty), f.options(RUN)).await;
    let report = result.unwrap();

    let event = sink.event_for("same.txt");
    assert_eq!(event.action, Action::RetouchTimestamp);
    assert!(matches!(event.outcome, Outcome::Failed(ref reason) if reason.contains("setting modification time")));
    assert!(event.backup.is_none());
    assert_eq!(mtime(&f.remote("same.txt")), at(T + 5));

    assert_eq!(report.failed, 1);
    assert_eq!(report.created, 1);
    assert_eq!(mtime(&f.remote("sibling.txt")), at(T));
    assert!(!report.backup_root_retained);
}

#[tokio::test]
async fn test_failed_remove_keeps_backup() {
    let f = Fixture::new();
    write_file(&f.remote("stuck.txt"), b"stuck", at(T));
    write_file(&f.remote("gone.txt"), b"gone", at(T));

    let faulty = FaultyFs {
        fail_remove: vec!["remote/stuck.txt".to_string()],
        ..FaultyFs::default()
    };
    let (result, sink) = f.run_with(Arc::new(faulty), f.options(RUN)).await;
    let report = result.unwrap();

    let event = sink.event_for("stuck.txt");
    assert_eq!(event.action, Action::Delete);
    assert!(matches!(event.outcome, Outcome::Failed(ref reason) if reason.contains("removing remote file")));
    assert_eq!(event.backup.as_deref().map(PathBuf::from), Some(f.backup(RUN, "stuck.txt")));
    assert!(f.remote("stuck.txt").exists());

    assert!(sink.event_for("gone.txt").outcome.is_success());
    assert!(!f.remote("gone.txt").exists());

    assert_eq!(report.deleted, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.backups, 2);
    assert!(report.backup_root_retained);
    assert_eq!(fs::read(f.backup(RUN, "stuck.txt")).unwrap(), b"stuck");
}

#[tokio::test]
async fn test_fingerprint_failure_is_reported_as_noop() {
    let f = Fixture::new();
    write_file(&f.local("x.txt"), b"local version", at(T));
    write_file(&f.remote("x.txt"), b"remote", at(T));

    let faulty = FaultyFs {
        fail_open_read: vec!["remote/x.txt".to_string()],
        ..FaultyFs::default()
    };
    let (result, sink) = f.run_with(Arc::new(faulty), f.options(RUN)).await;
    let report = result.unwrap();

    assert_eq!(report.failed, 1);
    let event = sink.event_for("x.txt");
    assert_eq!(event.action, Action::NoOp);
    assert!(!event.outcome.is_success());
    assert_eq!(fs::read(f.remote("x.txt")).unwrap(), b"remote");
}

#[tokio::test]
async fn test_unreadable_remote_directory_degrades_scan() {
    let f = Fixture::new();
    write_file(&f.local("locked/a.txt"), b"same", at(T));
    write_file(&f.local("open/b.txt"), b"bbb", at(T));
    write_file(&f.remote("locked/a.txt"), b"same", at(T));
    write_file(&f.remote("locked/stale.txt"), b"unseen", at(T));

    let faulty = FaultyFs {
        fail_read_dir: vec!["remote/locked".to_string()],
        ..FaultyFs::default()
    };
    let (result, sink) = f.run_with(Arc::new(faulty), f.options(RUN)).await;
    let report = result.unwrap();

    assert!(report.remote_scan_degraded);
    // confirmed by stat, not recreated
    assert_eq!(sink.event_for("locked/a.txt").action, Action::NoOp);
    assert_eq!(sink.event_for("open/b.txt").action, Action::Create);
    // the unlisted file is not a delete candidate
    assert!(f.remote("locked/stale.txt").exists());
    assert_eq!(report.deleted, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_strict_remote_scan_aborts() {
    let f = Fixture::new();
    write_file(&f.local("a.txt"), b"a", at(T));
    write_file(&f.remote("locked/a.txt"), b"a", at(T));

    let faulty = FaultyFs {
        fail_read_dir: vec!["remote/locked".to_string()],
        ..FaultyFs::default()
    };
    let mut options = f.options(RUN);
    options.strict_remote_scan = true;

    let (result, sink) = f.run_with(Arc::new(faulty), options).await;
    let err = result.unwrap_err();
    assert!(matches!(err, SyncError::RemoteScan { .. }));
    assert!(err.is_fatal());
    assert!(sink.events().is_empty());
    assert!(!f.remote("a.txt").exists());
}

#[tokio::test]
async fn test_missing_local_root_is_fatal() {
    let f = Fixture::new();
    write_file(&f.remote("precious.txt"), b"do not delete", at(T));
    fs::remove_dir(f.local("")).unwrap();

    let (result, sink) = f.run_with(Arc::new(LocalDirFs::new()), f.options(RUN)).await;

    assert!(matches!(result.unwrap_err(), SyncError::LocalScan { .. }));
    assert!(sink.events().is_empty());
    assert!(sink.completed.lock().unwrap().is_none());
    assert!(f.remote("precious.txt").exists());
}

#[tokio::test]
async fn test_file_as_local_root_is_fatal() {
    let f = Fixture::new();
    write_file(&f.remote("keep1.txt"), b"one", at(T));
    write_file(&f.remote("sub/keep2.txt"), b"two", at(T));
    fs::remove_dir(f.local("")).unwrap();
    fs::write(f.dir.path().join("local"), b"a file, not a tree").unwrap();

    let (result, sink) = f.run_with(Arc::new(LocalDirFs::new()), f.options(RUN)).await;

    let err = result.unwrap_err();
    assert!(matches!(err, SyncError::LocalScan { .. }));
    assert!(err.is_fatal());
    assert!(sink.events().is_empty());
    assert_eq!(fs::read(f.remote("keep1.txt")).unwrap(), b"one");
    assert_eq!(fs::read(f.remote("sub/keep2.txt")).unwrap(), b"two");
    assert!(!f.backup(RUN, "").exists());
}

#[tokio::test]
async fn test_excluded_names_are_ignored_on_both_sides() {
    let f = Fixture::new();
    write_file(&f.local(".git/HEAD"), b"ref: main", at(T));
    write_file(&f.local("index.html"), b"<html>", at(T));
    write_file(&f.remote(".git/config"), b"[core]", at(T));

    let mut options = f.options(RUN);
    options.exclude = vec![".git".to_string()];
    let (result, _) = f.run_with(Arc::new(LocalDirFs::new()), options).await;
    let report = result.unwrap();

    assert_eq!(report.total_operations, 1);
    assert!(!f.remote(".git/HEAD").exists());
    assert!(f.remote(".git/config").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_run_processes_every_path() {
    let f = Fixture::new();
    for i in 0..20 {
        write_file(&f.local(&format!("dir{}/file{}.txt", i % 3, i)), format!("content {}", i).as_bytes(), at(T));
    }
    for i in 0..5 {
        write_file(&f.remote(&format!("old/{}.txt", i)), b"old", at(T));
    }

    let mut options = f.options(RUN);
    options.max_concurrency = 4;
    let (result, sink) = f.run_with(Arc::new(LocalDirFs::new()), options).await;
    let report = result.unwrap();

    assert_eq!(report.created, 20);
    assert_eq!(report.deleted, 5);
    assert_eq!(report.backups, 5);

    let mut counters: Vec<usize> = sink.events().iter().map(|(_, p)| p.completed).collect();
    counters.sort_unstable();
    assert_eq!(counters, (1..=25).collect::<Vec<_>>());
    assert!(sink.events().iter().all(|(_, p)| p.total == 25));
}

#[tokio::test]
#[cfg(unix)]
async fn test_permissions_follow_local_file() {
    use std::os::unix::fs::PermissionsExt;

    let f = Fixture::new();
    write_file(&f.local("deploy.sh"), b"#!/bin/sh\necho hi\n", at(T));
    fs::set_permissions(f.local("deploy.sh"), fs::Permissions::from_mode(0o750)).unwrap();

    let (report, _) = f.run(RUN).await;

    assert_eq!(report.created, 1);
    let mode = fs::metadata(f.remote("deploy.sh")).unwrap().permissions().mode() & 0o7777;
    assert_eq!(mode, 0o750);
}

#[test]
fn test_report_counts_failures_separately() {
    let mut report = SyncReport::default();
    report.record(&FileEvent::success("a", Action::Create));
    report.record(&FileEvent::failed("b", Action::Update, "denied"));
    report.record(&FileEvent::success("c", Action::Delete));

    assert_eq!(report.created, 1);
    assert_eq!(report.updated, 0);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.failed, 1);
    assert!(report.has_failures());
}
