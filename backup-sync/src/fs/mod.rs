//! Local filesystem side: metadata snapshots and the tree walker.

pub mod metadata;
pub mod walker;

pub use metadata::{FileMetadata, Inventory};
pub use walker::{scan_local, WalkOptions};
