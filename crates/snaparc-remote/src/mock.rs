//! In-memory object store for tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::stream::{self, StreamExt};

use crate::error::{RemoteError, RemoteResult};
use crate::store::{
    object_name, plan_segments, BoxFuture, RemoteStore, UploadEvent, UploadStream,
    DEFAULT_MAX_SEGMENTS,
};

/// Call counters for [`MockRemoteStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockRemoteStats {
    /// `container_exists` calls.
    pub exists_calls: u64,
    /// `list` calls.
    pub list_calls: u64,
    /// `upload` calls.
    pub upload_calls: u64,
    /// Segments stored across all uploads.
    pub segments_stored: u64,
}

/// Object store that keeps containers in memory.
#[derive(Debug)]
pub struct MockRemoteStore {
    containers: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    stats: Mutex<MockRemoteStats>,
    acknowledge_assembly: bool,
    max_segments: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            stats: Mutex::new(MockRemoteStats::default()),
            acknowledge_assembly: true,
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }

    /// Adds an empty container.
    pub fn with_container(self, container: &str) -> Self {
        lock(&self.containers)
            .entry(container.to_string())
            .or_default();
        self
    }

    /// When false, uploads store every segment but never confirm the object.
    pub fn with_acknowledge_assembly(mut self, acknowledge: bool) -> Self {
        self.acknowledge_assembly = acknowledge;
        self
    }

    /// Caps the number of segments per object.
    pub fn with_max_segments(mut self, max_segments: usize) -> Self {
        self.max_segments = max_segments;
        self
    }

    /// Stores an object directly, creating the container if needed.
    pub fn insert_object(&self, container: &str, name: &str, data: Vec<u8>) {
        lock(&self.containers)
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), data);
    }

    /// Contents of a stored object.
    pub fn object(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        lock(&self.containers)
            .get(container)
            .and_then(|objects| objects.get(name).cloned())
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MockRemoteStats {
        lock(&self.stats).clone()
    }

    async fn upload_events(
        &self,
        path: &Path,
        container: &str,
        segment_size: u64,
    ) -> Vec<RemoteResult<UploadEvent>> {
        lock(&self.stats).upload_calls += 1;
        if !lock(&self.containers).contains_key(container) {
            return vec![Err(RemoteError::ContainerNotFound {
                container: container.to_string(),
            })];
        }
        let object = match object_name(path) {
            Ok(object) => object,
            Err(e) => return vec![Err(e)],
        };
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => return vec![Err(e.into())],
        };

        let total_bytes = data.len() as u64;
        let ranges = match plan_segments(path, total_bytes, segment_size, self.max_segments) {
            Ok(ranges) => ranges,
            Err(e) => return vec![Err(e)],
        };
        let mut events: Vec<RemoteResult<UploadEvent>> = ranges
            .into_iter()
            .enumerate()
            .map(|(index, (offset, len))| {
                Ok(UploadEvent::SegmentUploaded {
                    index,
                    cumulative_bytes: offset + len,
                })
            })
            .collect();
        lock(&self.stats).segments_stored += events.len() as u64;

        if self.acknowledge_assembly {
            self.insert_object(container, &object, data);
            events.push(Ok(UploadEvent::ObjectAssembled {
                object,
                total_bytes,
            }));
        }
        events
    }
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MockRemoteStore {
    fn container_exists(&self, container: &str) -> BoxFuture<'_, RemoteResult<bool>> {
        let container = container.to_string();
        Box::pin(async move {
            lock(&self.stats).exists_calls += 1;
            Ok(lock(&self.containers).contains_key(&container))
        })
    }

    fn list(&self, container: &str, prefix: &str) -> BoxFuture<'_, RemoteResult<HashSet<String>>> {
        let container = container.to_string();
        let prefix = prefix.to_string();
        Box::pin(async move {
            lock(&self.stats).list_calls += 1;
            let containers = lock(&self.containers);
            let objects = containers
                .get(&container)
                .ok_or_else(|| RemoteError::ContainerNotFound {
                    container: container.clone(),
                })?;
            Ok(objects
                .keys()
                .filter(|name| name.starts_with(&prefix))
                .cloned()
                .collect())
        })
    }

    fn upload(&self, path: &Path, container: &str, segment_size: u64) -> UploadStream<'_> {
        let path = path.to_path_buf();
        let container = container.to_string();
        stream::once(async move { self.upload_events(&path, &container, segment_size).await })
            .flat_map(stream::iter)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Write;

    fn artifact(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path).unwrap().write_all(data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_container_exists() {
        let store = MockRemoteStore::new().with_container("helios");
        assert!(store.container_exists("helios").await.unwrap());
        assert!(!store.container_exists("other").await.unwrap());
        assert_eq!(store.stats().exists_calls, 2);
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MockRemoteStore::new();
        store.insert_object("c", "abc\\x2fsnaps\\x2f1", vec![]);
        store.insert_object("c", "abc\\x2fsnaps\\x2f2", vec![]);
        store.insert_object("c", "xyz\\x2fsnaps\\x2f1", vec![]);

        let names = store.list("c", "abc").await.unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains("abc\\x2fsnaps\\x2f2"));

        assert!(matches!(
            store.list("missing", "").await,
            Err(RemoteError::ContainerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_upload_segments_and_assembles() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "obj", &[7u8; 25]);
        let store = MockRemoteStore::new().with_container("c");

        let events: Vec<UploadEvent> = store.upload(&path, "c", 10).try_collect().await.unwrap();
        assert_eq!(
            events,
            vec![
                UploadEvent::SegmentUploaded { index: 0, cumulative_bytes: 10 },
                UploadEvent::SegmentUploaded { index: 1, cumulative_bytes: 20 },
                UploadEvent::SegmentUploaded { index: 2, cumulative_bytes: 25 },
                UploadEvent::ObjectAssembled { object: "obj".to_string(), total_bytes: 25 },
            ]
        );
        assert_eq!(store.object("c", "obj").unwrap(), vec![7u8; 25]);
        assert_eq!(store.stats().segments_stored, 3);
    }

    #[tokio::test]
    async fn test_upload_without_acknowledgement() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "obj", b"data");
        let store = MockRemoteStore::new()
            .with_container("c")
            .with_acknowledge_assembly(false);

        let events: Vec<UploadEvent> = store.upload(&path, "c", 10).try_collect().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(store.object("c", "obj").is_none());
    }

    #[tokio::test]
    async fn test_upload_too_many_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "obj", &[1u8; 31]);
        let store = MockRemoteStore::new()
            .with_container("c")
            .with_max_segments(3);

        let result: RemoteResult<Vec<UploadEvent>> = store.upload(&path, "c", 10).try_collect().await;
        match result {
            Err(RemoteError::FileTooLarge { size, limit, .. }) => {
                assert_eq!(size, 31);
                assert_eq!(limit, 30);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(store.stats().segments_stored, 0);
        assert!(store.object("c", "obj").is_none());
    }

    #[tokio::test]
    async fn test_upload_missing_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "obj", b"data");
        let store = MockRemoteStore::new();
        let result: RemoteResult<Vec<UploadEvent>> = store.upload(&path, "c", 10).try_collect().await;
        assert!(matches!(result, Err(RemoteError::ContainerNotFound { .. })));
    }
}
