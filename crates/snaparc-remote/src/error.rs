//! Error types for the remote subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur talking to the object store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The destination container does not exist; nothing was sent.
    #[error("container not found: {container}")]
    ContainerNotFound {
        /// Container name.
        container: String,
    },

    /// Every segment went through but the store never confirmed the object.
    #[error("upload of {object} not acknowledged after {bytes} bytes")]
    AssemblyNotAcknowledged {
        /// Object name.
        object: String,
        /// Bytes uploaded before the stream ended.
        bytes: u64,
    },

    /// The file needs more segments than one object may have; nothing was sent.
    #[error("{} is too large: {size} bytes, limit {limit}", .path.display())]
    FileTooLarge {
        /// Artifact path.
        path: PathBuf,
        /// File size in bytes.
        size: u64,
        /// Largest size that fits in the allowed segments.
        limit: u64,
    },

    /// The store answered with an unexpected status.
    #[error("HTTP {status} from {url}")]
    Http {
        /// Request URL.
        url: String,
        /// Status code.
        status: u16,
    },

    /// Authentication failed or is not configured.
    #[error("authentication error: {msg}")]
    Auth {
        /// What went wrong.
        msg: String,
    },

    /// The file cannot be uploaded under a valid object name.
    #[error("invalid object path: {}", .path.display())]
    InvalidObject {
        /// Offending path.
        path: PathBuf,
    },

    /// A response body could not be decoded.
    #[error("malformed response: {msg}")]
    Malformed {
        /// Decoder message.
        msg: String,
    },

    /// Transport-level HTTP failure.
    #[error("transport error")]
    Transport(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}
