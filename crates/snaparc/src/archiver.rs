//! Archive runs: list what the remote already holds, then produce and upload
//! the remaining units of a lineage one at a time.

use std::sync::Arc;

use futures::StreamExt;
use snaparc_core::{
    archived_subset, common_prefix, name, resolve, storage_name, ArchivalUnit, ArchiveEvent,
    CoreResult, EventSink, Snapshot,
};
use snaparc_remote::{upload_with_progress, RemoteStore};
use snaparc_transfer::TransferPipeline;
use tracing::{debug, info};

use crate::config::ArchiveConfig;
use crate::error::ArchiveResult;

/// What a run would do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePlan {
    /// Snapshots already in the remote, oldest first.
    pub archived: Vec<Snapshot>,
    /// Units still to archive, in order.
    pub pending: Vec<ArchivalUnit>,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Object names stored by this run, in order.
    pub archived: Vec<String>,
    /// Total bytes uploaded.
    pub bytes_uploaded: u64,
}

/// Archives lineages into one container.
pub struct Archiver {
    config: ArchiveConfig,
    store: Arc<dyn RemoteStore>,
    pipeline: TransferPipeline,
    sink: Arc<dyn EventSink>,
}

impl Archiver {
    /// Creates an archiver for `config` uploading to `store`.
    pub fn new(config: ArchiveConfig, store: Arc<dyn RemoteStore>, sink: Arc<dyn EventSink>) -> Self {
        let pipeline = TransferPipeline::new(
            config.tools.clone(),
            config.transfer_options(),
            sink.clone(),
        );
        Self {
            config,
            store,
            pipeline,
            sink,
        }
    }

    /// Snapshots of `lineage` already present in the container.
    async fn fetch_archived(&self, lineage: &[Snapshot]) -> ArchiveResult<Vec<Snapshot>> {
        let names = lineage
            .iter()
            .map(storage_name)
            .collect::<CoreResult<Vec<_>>>()?;
        let prefix = common_prefix(&names);
        let container = &self.config.container_name;

        self.sink.emit(ArchiveEvent::ListingRemote {
            container: container.clone(),
            prefix: prefix.clone(),
        });
        let identifiers = self.store.list(container, &prefix).await?;
        let archived = archived_subset(lineage, &identifiers)?;
        self.sink.emit(ArchiveEvent::RemoteListed {
            count: identifiers.len(),
            matched: archived.len(),
        });
        Ok(archived)
    }

    /// Works out the pending units without producing anything.
    pub async fn plan(&self, lineage: &[Snapshot]) -> ArchiveResult<ArchivePlan> {
        if lineage.is_empty() {
            return Ok(ArchivePlan {
                archived: Vec::new(),
                pending: Vec::new(),
            });
        }
        let archived = self.fetch_archived(lineage).await?;
        let pending = resolve(lineage, &archived)?.collect();
        Ok(ArchivePlan { archived, pending })
    }

    /// Archives every pending unit of `lineage`, stopping at the first error.
    ///
    /// Units archived before an error stay archived; the next run resumes
    /// after them.
    pub async fn run(&self, lineage: &[Snapshot]) -> ArchiveResult<RunSummary> {
        let mut summary = RunSummary::default();
        if lineage.is_empty() {
            info!("No read-only snapshots to archive");
            return Ok(summary);
        }

        let archived = self.fetch_archived(lineage).await?;
        let pending = resolve(lineage, &archived)?;
        if pending.len() == 0 {
            info!(archived = archived.len(), "Lineage already archived");
            return Ok(summary);
        }

        for unit in pending {
            self.sink.emit(ArchiveEvent::UnitResolved {
                unit: unit.to_string(),
            });
            let bytes = self.archive_unit(&unit).await?;
            summary.archived.push(name(&unit)?);
            summary.bytes_uploaded += bytes;
        }

        info!(
            units = summary.archived.len(),
            bytes = summary.bytes_uploaded,
            "Archive run complete"
        );
        Ok(summary)
    }

    async fn archive_unit(&self, unit: &ArchivalUnit) -> ArchiveResult<u64> {
        let prepared = self.pipeline.prepare(unit, &self.config.staging_dir).await?;
        let artifact = prepared.target_path().to_path_buf();

        let mut progress = prepared.into_progress();
        while let Some(line) = progress.next().await {
            line?;
        }
        debug!(artifact = %artifact.display(), "Artifact ready");

        let mut uploaded = upload_with_progress(
            self.store.as_ref(),
            &artifact,
            &self.config.container_name,
            self.config.segment_size_bytes,
            self.sink.clone(),
        );
        let mut bytes = 0;
        while let Some(cumulative) = uploaded.next().await {
            bytes = cumulative?;
        }

        if !self.config.keep_artifacts {
            tokio::fs::remove_file(&artifact).await?;
            self.sink
                .emit(ArchiveEvent::ArtifactRemoved { path: artifact });
        }
        Ok(bytes)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ArchiveError;
    use snaparc_core::{CoreError, RecordingSink};
    use snaparc_remote::{MockRemoteStore, RemoteError};
    use snaparc_transfer::{Metering, ToolPaths, TransferError};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    const CONTAINER: &str = "helios";

    fn snap(n: u64) -> Snapshot {
        Snapshot::new("U", format!("snaps/{}", n), format!("/mnt/pool/snaps/{}", n), n)
    }

    fn lineage(count: u64) -> Vec<Snapshot> {
        (1..=count).map(snap).collect()
    }

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct Rig {
        _bin: TempDir,
        staging: TempDir,
        config: ArchiveConfig,
        store: Arc<MockRemoteStore>,
        sink: Arc<RecordingSink>,
    }

    impl Rig {
        fn new(send: &str) -> Self {
            let bin = tempfile::tempdir().unwrap();
            let staging = tempfile::tempdir().unwrap();
            let config = ArchiveConfig {
                container_name: CONTAINER.to_string(),
                staging_dir: staging.path().to_path_buf(),
                metering: Metering::Off,
                segment_size_bytes: 8,
                tools: ToolPaths {
                    serializer: script(bin.path(), "send", send),
                    encryptor: script(bin.path(), "encrypt", "cat"),
                    meter: script(bin.path(), "meter", "cat"),
                },
                ..Default::default()
            };
            Self {
                _bin: bin,
                staging,
                config,
                store: Arc::new(MockRemoteStore::new().with_container(CONTAINER)),
                sink: Arc::new(RecordingSink::new()),
            }
        }

        fn archiver(&self) -> Archiver {
            Archiver::new(self.config.clone(), self.store.clone(), self.sink.clone())
        }

        fn stored(&self, snapshot: &Snapshot) -> Option<String> {
            self.store
                .object(CONTAINER, &storage_name(snapshot).unwrap())
                .map(|data| String::from_utf8(data).unwrap())
        }

        fn staged(&self) -> usize {
            std::fs::read_dir(self.staging.path()).unwrap().count()
        }
    }

    const SEND: &str = "printf 'stream:%s' \"$*\"";

    #[tokio::test]
    async fn test_plan_empty_remote() {
        let rig = Rig::new(SEND);
        let plan = rig.archiver().plan(&lineage(3)).await.unwrap();
        assert!(plan.archived.is_empty());
        assert_eq!(plan.pending.len(), 3);
        assert!(plan.pending[0].is_full());
        assert_eq!(plan.pending[2].parent(), Some(&snap(2)));
        assert_eq!(rig.staged(), 0);
    }

    #[tokio::test]
    async fn test_plan_lists_under_common_prefix() {
        let rig = Rig::new(SEND);
        rig.archiver().plan(&lineage(2)).await.unwrap();
        let listing = rig
            .sink
            .events()
            .into_iter()
            .find_map(|e| match e {
                ArchiveEvent::ListingRemote { prefix, .. } => Some(prefix),
                _ => None,
            })
            .unwrap();
        assert_eq!(listing, "U\\x2fsnaps\\x2f");
    }

    #[tokio::test]
    async fn test_run_archives_whole_lineage() {
        let rig = Rig::new(SEND);
        let local = lineage(3);
        let summary = rig.archiver().run(&local).await.unwrap();

        assert_eq!(summary.archived.len(), 3);
        assert_eq!(summary.archived[0], "U\\x2fsnaps\\x2f1");
        assert_eq!(
            rig.stored(&local[0]).unwrap(),
            "stream:send /mnt/pool/snaps/1"
        );
        assert_eq!(
            rig.stored(&local[2]).unwrap(),
            "stream:send -p /mnt/pool/snaps/2 /mnt/pool/snaps/3"
        );
        let expected: u64 = local
            .iter()
            .map(|s| rig.stored(s).unwrap().len() as u64)
            .sum();
        assert_eq!(summary.bytes_uploaded, expected);
        assert_eq!(rig.staged(), 0);
    }

    #[tokio::test]
    async fn test_run_resumes_after_archived_prefix() {
        let rig = Rig::new(SEND);
        let local = lineage(3);
        rig.store
            .insert_object(CONTAINER, &storage_name(&local[0]).unwrap(), b"old".to_vec());

        let summary = rig.archiver().run(&local).await.unwrap();
        assert_eq!(summary.archived, vec!["U\\x2fsnaps\\x2f2", "U\\x2fsnaps\\x2f3"]);
        assert_eq!(rig.stored(&local[0]).unwrap(), "old");
        assert_eq!(
            rig.stored(&local[1]).unwrap(),
            "stream:send -p /mnt/pool/snaps/1 /mnt/pool/snaps/2"
        );
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let rig = Rig::new(SEND);
        let local = lineage(2);
        rig.archiver().run(&local).await.unwrap();
        let uploads = rig.store.stats().upload_calls;

        let summary = rig.archiver().run(&local).await.unwrap();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(rig.store.stats().upload_calls, uploads);
    }

    #[tokio::test]
    async fn test_hole_in_archive_is_rejected() {
        let rig = Rig::new(SEND);
        let local = lineage(3);
        rig.store
            .insert_object(CONTAINER, &storage_name(&local[1]).unwrap(), Vec::new());

        let result = rig.archiver().run(&local).await;
        assert!(matches!(
            result,
            Err(ArchiveError::Core(CoreError::InconsistentLayout { position: 0, .. }))
        ));
        assert_eq!(rig.store.stats().upload_calls, 0);
    }

    #[tokio::test]
    async fn test_empty_lineage() {
        let rig = Rig::new(SEND);
        let summary = rig.archiver().run(&[]).await.unwrap();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(rig.store.stats().list_calls, 0);
    }

    #[tokio::test]
    async fn test_serializer_failure_stops_run() {
        let rig = Rig::new("case \"$*\" in *snaps/2*) echo broken >&2; exit 1;; esac; printf ok");
        let local = lineage(3);

        let result = rig.archiver().run(&local).await;
        match result {
            Err(ArchiveError::Transfer(TransferError::PipelineFailure { failures })) => {
                assert_eq!(failures[0].stderr, "broken");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(rig.stored(&local[0]).is_some());
        assert!(rig.stored(&local[1]).is_none());
        assert_eq!(rig.store.stats().upload_calls, 1);
    }

    #[tokio::test]
    async fn test_missing_container() {
        let mut rig = Rig::new(SEND);
        rig.store = Arc::new(MockRemoteStore::new());
        let result = rig.archiver().run(&lineage(1)).await;
        assert!(matches!(
            result,
            Err(ArchiveError::Remote(RemoteError::ContainerNotFound { .. }))
        ));
        assert_eq!(rig.staged(), 0);
    }

    #[tokio::test]
    async fn test_unacknowledged_upload_keeps_artifact() {
        let mut rig = Rig::new(SEND);
        rig.store = Arc::new(
            MockRemoteStore::new()
                .with_container(CONTAINER)
                .with_acknowledge_assembly(false),
        );
        let result = rig.archiver().run(&lineage(2)).await;
        assert!(matches!(
            result,
            Err(ArchiveError::Remote(RemoteError::AssemblyNotAcknowledged { .. }))
        ));
        assert_eq!(rig.staged(), 1);
        assert_eq!(rig.store.stats().upload_calls, 1);
    }

    #[tokio::test]
    async fn test_keep_artifacts() {
        let mut rig = Rig::new(SEND);
        rig.config.keep_artifacts = true;
        rig.archiver().run(&lineage(2)).await.unwrap();
        assert_eq!(rig.staged(), 2);
        assert!(!rig
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, ArchiveEvent::ArtifactRemoved { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_run_archives_nothing() {
        let marker_dir = tempfile::tempdir().unwrap();
        let marker = marker_dir.path().join("finished");
        let rig = Rig::new(&format!("sleep 1; touch '{}'; printf late", marker.display()));
        let local = lineage(1);
        let archiver = rig.archiver();

        let result = tokio::time::timeout(Duration::from_millis(200), archiver.run(&local)).await;
        assert!(result.is_err(), "run should still be producing the unit");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists(), "serializer kept running after the run was dropped");
        assert!(rig.stored(&local[0]).is_none());
        assert_eq!(rig.store.stats().upload_calls, 0);
        assert!(!rig
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, ArchiveEvent::ObjectAssembled { .. })));
    }

    #[tokio::test]
    async fn test_leftover_artifact_blocks_unit() {
        let rig = Rig::new(SEND);
        let local = lineage(1);
        std::fs::write(rig.staging.path().join(storage_name(&local[0]).unwrap()), b"stale").unwrap();

        let result = rig.archiver().run(&local).await;
        assert!(matches!(
            result,
            Err(ArchiveError::Transfer(TransferError::Precondition { .. }))
        ));
        assert_eq!(rig.store.stats().upload_calls, 0);
    }
}
