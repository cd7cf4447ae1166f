#![warn(missing_docs)]

//! snaparc transfer subsystem: turns an archival unit into a local artifact.
//!
//! A unit is serialized by the filesystem's send tool, optionally encrypted and
//! optionally passed through a meter that reports progress and caps the
//! transfer rate. The stages run as separate processes connected by pipes;
//! the caller observes them through a pull-driven progress stream.

pub mod error;
pub mod pipeline;
pub mod progress;
pub mod rate;
pub mod stage;
pub mod tools;

pub use error::{StageFailure, TransferError, TransferResult};
pub use pipeline::{Metering, PreparedTransfer, ProgressStream, TransferOptions, TransferPipeline};
pub use progress::ProgressDecoder;
pub use rate::RateLimit;
pub use stage::{Stage, StageChainBuilder, StageRole, StageSpec};
pub use tools::{locate_tool, ToolPaths};
