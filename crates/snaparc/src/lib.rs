#![warn(missing_docs)]

//! snaparc: archives the read-only snapshots of a btrfs subvolume to object storage

pub mod archiver;
pub mod cli;
pub mod config;
pub mod error;
pub mod inspector;

pub use archiver::{ArchivePlan, Archiver, RunSummary};
pub use cli::Cli;
pub use config::ArchiveConfig;
pub use error::{ArchiveError, ArchiveResult};
pub use inspector::{BtrfsInspector, SnapshotInspector};
