//! Diagnostic events and the sinks that receive them.
//!
//! Library code reports what it is doing through an [`EventSink`] supplied by
//! the caller instead of logging on its own. [`TracingSink`] forwards events
//! to `tracing`; [`RecordingSink`] keeps them for inspection in tests.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, info, warn};

/// Something worth reporting during an archive run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEvent {
    /// About to list remote objects.
    ListingRemote {
        /// Container being listed.
        container: String,
        /// Prefix filter sent with the listing.
        prefix: String,
    },
    /// Remote listing finished.
    RemoteListed {
        /// Number of objects returned by the remote.
        count: usize,
        /// Number of local snapshots found among them.
        matched: usize,
    },
    /// A unit of work was selected for archival.
    UnitResolved {
        /// Human-readable description of the unit.
        unit: String,
    },
    /// A transfer pipeline is about to start its stages.
    TransferPrepared {
        /// Artifact being written.
        artifact: PathBuf,
        /// Number of stages in the chain.
        stages: usize,
    },
    /// A pipeline stage process was started.
    StageSpawned {
        /// Stage role (serializer, encryptor, meter).
        stage: &'static str,
        /// Program path.
        program: PathBuf,
    },
    /// A pipeline stage process exited.
    StageExited {
        /// Stage role.
        stage: &'static str,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },
    /// A progress line produced by the meter stage.
    ProgressLine {
        /// The line, without terminator.
        line: String,
    },
    /// The meter's output could not be read; progress stops, the transfer goes on.
    MeterUnreadable {
        /// Read error.
        error: String,
    },
    /// A session with the object store is ready.
    SessionEstablished {
        /// Storage endpoint in use.
        storage_url: String,
    },
    /// An upload is about to start.
    UploadStarted {
        /// Destination container.
        container: String,
        /// Local artifact.
        path: PathBuf,
    },
    /// The backend split an object into segments.
    UploadPlanned {
        /// Object name.
        object: String,
        /// Object size in bytes.
        bytes: u64,
        /// Number of segments.
        segments: usize,
    },
    /// A segment reached the remote.
    SegmentUploaded {
        /// Zero-based segment index.
        index: usize,
        /// Bytes uploaded so far for this object.
        cumulative_bytes: u64,
    },
    /// The remote acknowledged the complete object.
    ObjectAssembled {
        /// Object name.
        object: String,
        /// Object size in bytes.
        bytes: u64,
    },
    /// A local artifact was removed after a successful upload.
    ArtifactRemoved {
        /// Path of the removed file.
        path: PathBuf,
    },
}

/// Receiver of diagnostic events.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: ArchiveEvent);
}

/// Forwards events to the `tracing` macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ArchiveEvent) {
        match event {
            ArchiveEvent::ListingRemote { container, prefix } => {
                debug!(%container, %prefix, "Listing remote objects");
            }
            ArchiveEvent::RemoteListed { count, matched } => {
                debug!(count, matched, "Remote listing done");
            }
            ArchiveEvent::UnitResolved { unit } => info!("To archive: {}", unit),
            ArchiveEvent::TransferPrepared { artifact, stages } => {
                debug!(artifact = %artifact.display(), stages, "Preparing artifact");
            }
            ArchiveEvent::StageSpawned { stage, program } => {
                debug!(stage, program = %program.display(), "Stage spawned");
            }
            ArchiveEvent::StageExited { stage, code: Some(0) } => {
                debug!(stage, "Stage finished");
            }
            ArchiveEvent::StageExited { stage, code } => {
                warn!(stage, ?code, "Stage failed");
            }
            ArchiveEvent::ProgressLine { line } => info!("{}", line),
            ArchiveEvent::MeterUnreadable { error } => {
                warn!(%error, "Meter output unreadable");
            }
            ArchiveEvent::SessionEstablished { storage_url } => {
                info!(%storage_url, "Object store session ready");
            }
            ArchiveEvent::UploadStarted { container, path } => {
                debug!(%container, path = %path.display(), "Starting upload");
            }
            ArchiveEvent::UploadPlanned {
                object,
                bytes,
                segments,
            } => {
                debug!(%object, bytes, segments, "Upload planned");
            }
            ArchiveEvent::SegmentUploaded {
                index,
                cumulative_bytes,
            } => {
                info!(segment = index, bytes = cumulative_bytes, "Segment uploaded");
            }
            ArchiveEvent::ObjectAssembled { object, bytes } => {
                info!(%object, bytes, "Object stored");
            }
            ArchiveEvent::ArtifactRemoved { path } => {
                debug!(path = %path.display(), "Removed local artifact");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ArchiveEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ArchiveEvent>>,
}

impl RecordingSink {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of the events received so far.
    pub fn events(&self) -> Vec<ArchiveEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ArchiveEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
