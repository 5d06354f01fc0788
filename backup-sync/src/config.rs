//! Configuration management for backup-sync.
//!
//! Loads configuration from TOML file with environment variable overrides.

use crate::executor::SyncOptions;
use crate::sync::run_timestamp;
use crate::utils::{Result, SyncError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// How the target tree is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Sftp,
    /// Target is a locally mounted directory
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub transport: Transport,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Private key file for public-key authentication
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    #[serde(default)]
    pub passphrase: Option<String>,

    /// Preferred host key algorithms, most preferred first
    #[serde(default)]
    pub host_key_algorithms: Vec<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Local tree to mirror
    pub source_dir: PathBuf,

    /// Remote tree brought in line with `source_dir`
    pub target_dir: String,

    /// Remote directory receiving one backup directory per run
    pub backup_base: String,

    /// Allowed mtime drift in milliseconds (default: 2000)
    #[serde(default = "default_time_tolerance_ms")]
    pub time_tolerance_ms: u64,

    /// Files processed at once (default: 1)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub strict_remote_scan: bool,

    #[serde(default = "default_true")]
    pub preserve_mtime: bool,

    /// Entry names ignored on both sides
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// Default values
fn default_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_time_tolerance_ms() -> u64 {
    2000
}

fn default_max_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Load, apply environment overrides (including a `.env` file) and validate
    pub fn load(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override credentials and endpoint from `BACKUP_SYNC_*` variables
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup("BACKUP_SYNC_PASSWORD") {
            self.remote.password = Some(password);
        }
        if let Some(host) = lookup("BACKUP_SYNC_HOST") {
            self.remote.host = host;
        }
        if let Some(user) = lookup("BACKUP_SYNC_USER") {
            self.remote.user = user;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let sync = &self.sync;

        if sync.source_dir.as_os_str().is_empty() {
            return Err(SyncError::Config("sync.source_dir is empty".into()));
        }
        if sync.target_dir.trim().is_empty() {
            return Err(SyncError::Config("sync.target_dir is empty".into()));
        }
        if sync.backup_base.trim().is_empty() {
            return Err(SyncError::Config("sync.backup_base is empty".into()));
        }
        if sync.max_concurrency == 0 {
            return Err(SyncError::Config("sync.max_concurrency must be at least 1".into()));
        }

        // Backups inside the target tree would be scanned as remote-only files
        let target = sync.target_dir.trim_end_matches('/');
        let backup = sync.backup_base.trim_end_matches('/');
        if backup == target || backup.starts_with(&format!("{}/", target)) {
            return Err(SyncError::Config(format!(
                "sync.backup_base {} must be outside sync.target_dir {}",
                sync.backup_base, sync.target_dir
            )));
        }

        if self.remote.transport == Transport::Sftp {
            if self.remote.connect_timeout_secs == 0 {
                return Err(SyncError::Config("remote.connect_timeout_secs must be at least 1".into()));
            }
            if self.remote.host.is_empty() {
                return Err(SyncError::Config("remote.host is required for sftp".into()));
            }
            if self.remote.user.is_empty() {
                return Err(SyncError::Config("remote.user is required for sftp".into()));
            }
            if self.remote.password.is_none() && self.remote.private_key.is_none() {
                return Err(SyncError::Config(
                    "remote.password or remote.private_key is required for sftp".into(),
                ));
            }
        }

        Ok(())
    }

    /// Executor options for a run starting now
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            local_root: self.sync.source_dir.clone(),
            remote_root: self.sync.target_dir.clone(),
            backup_base: self.sync.backup_base.clone(),
            run_timestamp: run_timestamp(chrono::Local::now()),
            time_tolerance: Duration::from_millis(self.sync.time_tolerance_ms),
            max_concurrency: self.sync.max_concurrency,
            strict_remote_scan: self.sync.strict_remote_scan,
            preserve_mtime: self.sync.preserve_mtime,
            exclude: self.sync.exclude.clone(),
        }
    }
}
