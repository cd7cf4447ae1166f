//! The object store interface consumed by the archiver.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use futures::stream::BoxStream;

use crate::error::{RemoteError, RemoteResult};

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stream of upload events from a backend.
pub type UploadStream<'a> = BoxStream<'a, RemoteResult<UploadEvent>>;

/// Default segment size for large objects (100 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 100 * 1024 * 1024;

/// Default cap on segments per object, Swift's `max_manifest_segments`.
pub const DEFAULT_MAX_SEGMENTS: usize = 1000;

/// Progress reported by a backend while uploading one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// A segment is stored.
    SegmentUploaded {
        /// Zero-based segment index.
        index: usize,
        /// Bytes stored so far, this segment included.
        cumulative_bytes: u64,
    },
    /// The store confirmed the whole object.
    ObjectAssembled {
        /// Object name.
        object: String,
        /// Object size.
        total_bytes: u64,
    },
}

/// Trait for object store operations.
pub trait RemoteStore: Send + Sync {
    /// Check whether a container exists.
    fn container_exists(&self, container: &str) -> BoxFuture<'_, RemoteResult<bool>>;

    /// Names of the objects in `container` starting with `prefix`.
    fn list(&self, container: &str, prefix: &str) -> BoxFuture<'_, RemoteResult<HashSet<String>>>;

    /// Upload the file at `path` into `container`, named after the file.
    ///
    /// The stream yields one event per stored segment and ends with
    /// [`UploadEvent::ObjectAssembled`] when the store confirms the object.
    fn upload(&self, path: &Path, container: &str, segment_size: u64) -> UploadStream<'_>;
}

/// Object name for an artifact: its file name.
pub fn object_name(path: &Path) -> RemoteResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| RemoteError::InvalidObject {
            path: path.to_path_buf(),
        })
}

/// Byte ranges `(offset, len)` of the segments of a `size`-byte object.
///
/// An empty object has a single empty segment.
pub(crate) fn segment_ranges(size: u64, segment_size: u64) -> Vec<(u64, u64)> {
    let segment_size = segment_size.max(1);
    if size == 0 {
        return vec![(0, 0)];
    }
    (0..size)
        .step_by(segment_size as usize)
        .map(|offset| (offset, segment_size.min(size - offset)))
        .collect()
}

/// Segment ranges for `path`, or [`RemoteError::FileTooLarge`] when there
/// would be more than `max_segments` of them.
pub(crate) fn plan_segments(
    path: &Path,
    size: u64,
    segment_size: u64,
    max_segments: usize,
) -> RemoteResult<Vec<(u64, u64)>> {
    let ranges = segment_ranges(size, segment_size);
    if ranges.len() > max_segments {
        return Err(RemoteError::FileTooLarge {
            path: path.to_path_buf(),
            size,
            limit: segment_size.max(1).saturating_mul(max_segments as u64),
        });
    }
    Ok(ranges)
}
