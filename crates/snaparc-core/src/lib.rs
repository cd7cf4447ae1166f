#![warn(missing_docs)]

//! snaparc core: snapshot lineage resolution and archive object naming.
//!
//! This crate decides which read-only snapshots of a subvolume still have to be
//! sent to remote storage, as full snapshots or as deltas against an already
//! archived predecessor, and maps every unit of work to a flat object name.
//! It performs no I/O; diagnostics flow through an injected [`EventSink`].

pub mod error;
pub mod events;
pub mod lineage;
pub mod naming;
pub mod snapshot;

pub use error::{CoreError, CoreResult};
pub use events::{ArchiveEvent, EventSink, NullSink, RecordingSink, TracingSink};
pub use lineage::{archived_subset, next_unit, resolve, PendingUnits};
pub use naming::{common_prefix, name, sanitize, storage_name, ESCAPE_TOKEN};
pub use snapshot::{ArchivalUnit, Snapshot};
