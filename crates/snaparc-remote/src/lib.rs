#![warn(missing_docs)]

//! snaparc remote subsystem: where archive artifacts end up.
//!
//! The archiver needs two things from an object store: listing object names
//! under a prefix and uploading a file in fixed-size segments. [`RemoteStore`]
//! captures those; [`SwiftStore`] talks to OpenStack Swift and
//! [`MockRemoteStore`] keeps everything in memory for tests.

pub mod error;
pub mod mock;
pub mod store;
pub mod swift;
pub mod upload;

pub use error::{RemoteError, RemoteResult};
pub use mock::{MockRemoteStats, MockRemoteStore};
pub use store::{
    object_name, BoxFuture, RemoteStore, UploadEvent, UploadStream, DEFAULT_MAX_SEGMENTS,
    DEFAULT_SEGMENT_SIZE,
};
pub use swift::{SwiftConfig, SwiftStore};
pub use upload::{upload_file, upload_with_progress};
