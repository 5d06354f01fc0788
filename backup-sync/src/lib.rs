//! backup-sync library
//!
//! One-way mirroring of a local directory tree onto a remote tree over SFTP,
//! backing up every remote file before it is overwritten or deleted.

pub mod config;
pub mod executor;
pub mod fs;
pub mod remote;
pub mod sync;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{SyncExecutor, SyncOptions, SyncReport};
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;
