//! Uploading an artifact while reporting cumulative progress.
//!
//! [`upload_with_progress`] checks that the container exists, then relays the
//! backend's segment events as cumulative byte counts. The stream only ends
//! cleanly after the backend confirms the object; a backend stream that stops
//! short of that yields [`RemoteError::AssemblyNotAcknowledged`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use snaparc_core::{ArchiveEvent, EventSink};

use crate::error::{RemoteError, RemoteResult};
use crate::store::{object_name, RemoteStore, UploadEvent, UploadStream};

enum Phase<'a> {
    CheckContainer,
    Uploading(UploadStream<'a>),
    Finished,
}

struct UploadState<'a> {
    store: &'a dyn RemoteStore,
    path: PathBuf,
    container: String,
    segment_size: u64,
    sink: Arc<dyn EventSink>,
    phase: Phase<'a>,
    bytes: u64,
}

impl<'a> UploadState<'a> {
    async fn step(&mut self) -> Option<RemoteResult<u64>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Finished => return None,
                Phase::CheckContainer => {
                    match self.store.container_exists(&self.container).await {
                        Ok(true) => {
                            self.sink.emit(ArchiveEvent::UploadStarted {
                                container: self.container.clone(),
                                path: self.path.clone(),
                            });
                            self.phase = Phase::Uploading(self.store.upload(
                                &self.path,
                                &self.container,
                                self.segment_size,
                            ));
                        }
                        Ok(false) => {
                            return Some(Err(RemoteError::ContainerNotFound {
                                container: self.container.clone(),
                            }))
                        }
                        Err(e) => return Some(Err(e)),
                    }
                }
                Phase::Uploading(mut events) => match events.next().await {
                    Some(Ok(UploadEvent::SegmentUploaded {
                        index,
                        cumulative_bytes,
                    })) => {
                        self.bytes = self.bytes.max(cumulative_bytes);
                        self.sink.emit(ArchiveEvent::SegmentUploaded {
                            index,
                            cumulative_bytes: self.bytes,
                        });
                        self.phase = Phase::Uploading(events);
                        return Some(Ok(self.bytes));
                    }
                    Some(Ok(UploadEvent::ObjectAssembled {
                        object,
                        total_bytes,
                    })) => {
                        self.sink.emit(ArchiveEvent::ObjectAssembled {
                            object,
                            bytes: total_bytes,
                        });
                        return None;
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => {
                        let object = object_name(&self.path)
                            .unwrap_or_else(|_| self.path.display().to_string());
                        return Some(Err(RemoteError::AssemblyNotAcknowledged {
                            object,
                            bytes: self.bytes,
                        }));
                    }
                },
            }
        }
    }
}

/// Uploads `path` into `container` and yields cumulative bytes stored.
///
/// Each item is non-decreasing. The first error ends the stream.
pub fn upload_with_progress<'a>(
    store: &'a dyn RemoteStore,
    path: &Path,
    container: &str,
    segment_size: u64,
    sink: Arc<dyn EventSink>,
) -> BoxStream<'a, RemoteResult<u64>> {
    let state = UploadState {
        store,
        path: path.to_path_buf(),
        container: container.to_string(),
        segment_size,
        sink,
        phase: Phase::CheckContainer,
        bytes: 0,
    };
    stream::unfold(state, |mut state| async move {
        let item = state.step().await?;
        Some((item, state))
    })
    .boxed()
}

/// Drives [`upload_with_progress`] to the end and returns the bytes stored.
pub async fn upload_file(
    store: &dyn RemoteStore,
    path: &Path,
    container: &str,
    segment_size: u64,
    sink: Arc<dyn EventSink>,
) -> RemoteResult<u64> {
    let mut progress = upload_with_progress(store, path, container, segment_size, sink);
    let mut bytes = 0;
    while let Some(item) = progress.next().await {
        bytes = item?;
    }
    Ok(bytes)
}
