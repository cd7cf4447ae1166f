//! Snapshot descriptors and the units of archival work derived from them.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A read-only snapshot of a subvolume.
///
/// Equality and hashing cover every field, so two descriptors of the same
/// snapshot taken from different inspections compare equal only if nothing
/// about the snapshot changed in between.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    /// UUID of the subvolume this snapshot is a version of.
    pub lineage_id: String,
    /// Path relative to the top level of the filesystem.
    pub rel_path: String,
    /// Path on the host filesystem.
    pub abs_path: PathBuf,
    /// Creation time (seconds since epoch).
    pub created_at_secs: u64,
}

impl Snapshot {
    /// Creates a snapshot descriptor.
    pub fn new(
        lineage_id: impl Into<String>,
        rel_path: impl Into<String>,
        abs_path: impl Into<PathBuf>,
        created_at_secs: u64,
    ) -> Self {
        Self {
            lineage_id: lineage_id.into(),
            rel_path: rel_path.into(),
            abs_path: abs_path.into(),
            created_at_secs,
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<FS_TREE>/{}", self.rel_path)
    }
}

/// One thing to send to remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchivalUnit {
    /// The whole snapshot; nothing of its lineage is archived yet.
    Full(Snapshot),
    /// The changes from an archived `parent` to `snapshot`.
    Incremental {
        /// Already archived predecessor serving as the delta base.
        parent: Snapshot,
        /// Snapshot being archived.
        snapshot: Snapshot,
    },
}

impl ArchivalUnit {
    /// The snapshot this unit archives.
    pub fn target(&self) -> &Snapshot {
        match self {
            ArchivalUnit::Full(snapshot) => snapshot,
            ArchivalUnit::Incremental { snapshot, .. } => snapshot,
        }
    }

    /// The delta base, if any.
    pub fn parent(&self) -> Option<&Snapshot> {
        match self {
            ArchivalUnit::Full(_) => None,
            ArchivalUnit::Incremental { parent, .. } => Some(parent),
        }
    }

    /// Returns true for a full snapshot upload.
    pub fn is_full(&self) -> bool {
        matches!(self, ArchivalUnit::Full(_))
    }
}

impl fmt::Display for ArchivalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchivalUnit::Full(snapshot) => write!(f, "whole snapshot {}", snapshot),
            ArchivalUnit::Incremental { parent, snapshot } => {
                write!(f, "changes between {} and {}", parent, snapshot)
            }
        }
    }
}
