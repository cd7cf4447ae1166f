//! Errors surfaced by the archiver.

use snaparc_core::CoreError;
use snaparc_remote::RemoteError;
use snaparc_transfer::TransferError;
use thiserror::Error;

/// Result type alias for archiver operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors that can stop an archive run.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Lineage resolution or naming failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Producing a local artifact failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Talking to the object store failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The snapshot inspection tool failed or printed something unexpected.
    #[error("snapshot inspection failed: {msg}")]
    Inspect {
        /// What went wrong.
        msg: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transparent_wrapping() {
        let err: ArchiveError = RemoteError::ContainerNotFound {
            container: "c".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "container not found: c");

        let err = ArchiveError::Inspect {
            msg: "no UUID".to_string(),
        };
        assert_eq!(err.to_string(), "snapshot inspection failed: no UUID");
    }
}
