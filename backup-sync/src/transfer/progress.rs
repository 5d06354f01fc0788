//! Console progress reporting for sync runs.
//!
//! [`ConsoleProgress`] receives executor events, logs one line per path and
//! optionally drives an indicatif progress bar.

use crate::executor::events::{EventSink, FileEvent, Outcome, Progress, RunPhase};
use crate::executor::SyncReport;
use crate::sync::Action;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use tracing::{error, info};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}";

/// Event sink for interactive runs
pub struct ConsoleProgress {
    show_bar: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    /// `show_bar` should only be set when logs do not go to the same terminal
    pub fn new(show_bar: bool) -> Self {
        Self {
            show_bar,
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

impl EventSink for ConsoleProgress {
    fn on_phase(&self, phase: RunPhase) {
        info!("Phase: {}", phase);
        self.with_bar(|bar| bar.set_message(phase.to_string()));
    }

    fn on_start(&self, total_operations: usize) {
        info!("{} paths to reconcile", total_operations);
        if !self.show_bar {
            return;
        }

        let bar = ProgressBar::new(total_operations as u64);
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=>-"));
        }
        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(bar);
        }
    }

    fn on_event(&self, event: &FileEvent, progress: Progress) {
        match &event.outcome {
            Outcome::Success => info!(
                "[{}/{}] {}",
                progress.completed,
                progress.total,
                describe(event)
            ),
            Outcome::Failed(reason) => error!(
                "[{}/{}] {} {} failed: {}",
                progress.completed, progress.total, event.action, event.path, reason
            ),
        }

        self.with_bar(|bar| {
            bar.inc(1);
            bar.set_message(event.path.clone());
        });
    }

    fn on_complete(&self, report: &SyncReport) {
        self.with_bar(|bar| bar.finish_and_clear());
        info!("{}", summary(report));
    }
}

fn describe(event: &FileEvent) -> String {
    let mut line = match event.action {
        Action::Create => format!("Created {} ({})", event.path, format_bytes(event.bytes_transferred)),
        Action::Update => format!("Updated {} ({})", event.path, format_bytes(event.bytes_transferred)),
        Action::RetouchTimestamp => format!("Retouched timestamp of {}", event.path),
        Action::NoOp => format!("Unchanged {}", event.path),
        Action::Delete => format!("Deleted {}", event.path),
    };
    if let Some(backup) = &event.backup {
        line.push_str(&format!(", backup at {}", backup));
    }
    line
}

/// One-line run summary
pub fn summary(report: &SyncReport) -> String {
    let secs = report.duration.as_secs();
    let speed = if secs > 0 {
        report.bytes_transferred / secs
    } else {
        report.bytes_transferred
    };

    let mut line = format!(
        "{} created, {} updated, {} retouched, {} unchanged, {} deleted, {} failed; {} transferred in {} ({})",
        report.created,
        report.updated,
        report.retouched,
        report.unchanged,
        report.deleted,
        report.failed,
        format_bytes(report.bytes_transferred),
        format_duration(secs),
        format_speed(speed)
    );

    if report.backup_root_retained {
        line.push_str(&format!("; {} backups in {}", report.backups, report.backup_root));
    }
    if report.remote_scan_degraded {
        line.push_str("; remote scan was incomplete");
    }
    line
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
