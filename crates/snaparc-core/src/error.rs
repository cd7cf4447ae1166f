//! Error types for lineage resolution and naming.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error variants for lineage resolution and naming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A snapshot list handed to the resolver contains the same snapshot twice.
    ///
    /// This is a caller bug, never a runtime condition.
    #[error("Duplicate snapshot in input: {snapshot}")]
    DuplicateInput {
        /// The duplicated snapshot, as displayed.
        snapshot: String,
    },

    /// The archived snapshots are not a prefix of the local lineage.
    #[error("Inconsistent storage layout at position {position}: local {local} should equal archived {archived}")]
    InconsistentLayout {
        /// Index in creation order where local and archived diverge.
        position: usize,
        /// The local snapshot at that position.
        local: String,
        /// The archived snapshot at that position.
        archived: String,
    },

    /// A snapshot cannot be mapped to a storage name.
    #[error("Invalid storage name {name:?}: {reason}")]
    InvalidName {
        /// The unsanitized name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}
