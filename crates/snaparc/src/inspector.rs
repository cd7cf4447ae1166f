//! Discovering the read-only snapshots of a subvolume.
//!
//! [`BtrfsInspector`] runs `btrfs subvolume show` to learn the subvolume's
//! UUID and its path inside the filesystem, then `btrfs subvolume list` for
//! every read-only snapshot with its parent UUID and creation time. Snapshots
//! whose parent is the subvolume form its lineage.

use std::path::{Component, Path, PathBuf};

use chrono::{Local, NaiveDateTime, TimeZone};
use snaparc_core::Snapshot;
use snaparc_remote::BoxFuture;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};

/// Source of a subvolume's lineage.
pub trait SnapshotInspector: Send + Sync {
    /// Read-only snapshots of the subvolume at `path`, oldest first.
    fn read_only_snapshots<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, ArchiveResult<Vec<Snapshot>>>;
}

/// `btrfs subvolume show` fields used here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubvolumeInfo {
    /// Path relative to the top level, empty for the top level itself.
    pub rel_path: String,
    /// Subvolume UUID.
    pub uuid: String,
}

/// One line of `btrfs subvolume list -s -r -q -u`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedSnapshot {
    /// Subvolume id.
    pub id: u64,
    /// Creation time, seconds since epoch.
    pub otime: u64,
    /// UUID of the subvolume it was taken from, if any.
    pub parent_uuid: Option<String>,
    /// Path relative to the top level.
    pub rel_path: String,
}

fn inspect_error(msg: impl Into<String>) -> ArchiveError {
    ArchiveError::Inspect { msg: msg.into() }
}

/// Parses `btrfs subvolume show` output.
pub fn parse_subvolume_show(output: &str) -> ArchiveResult<SubvolumeInfo> {
    let mut lines = output.lines();
    let first = lines
        .next()
        .map(str::trim)
        .ok_or_else(|| inspect_error("empty subvolume show output"))?;
    let rel_path = if first == "/" || first.contains("<FS_TREE>") {
        String::new()
    } else {
        first.trim_matches('/').to_string()
    };

    let uuid = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "UUID")
        .map(|(_, value)| value.trim().to_string())
        .filter(|uuid| !uuid.is_empty() && uuid.as_str() != "-")
        .ok_or_else(|| inspect_error("subvolume show output has no UUID"))?;

    Ok(SubvolumeInfo { rel_path, uuid })
}

/// Reads an otime printed as wall-clock time in `tz`. On a DST fold the
/// earlier instant wins; a time inside a gap is read as UTC.
fn parse_otime_in<Tz: TimeZone>(date: &str, time: &str, tz: Tz) -> Option<u64> {
    let parsed = NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M:%S").ok()?;
    let timestamp = parsed
        .and_local_timezone(tz)
        .earliest()
        .map(|t| t.timestamp())
        .unwrap_or_else(|| parsed.and_utc().timestamp());
    Some(timestamp.max(0) as u64)
}

/// `btrfs subvolume list` prints otime in the local time zone.
fn parse_otime(date: &str, time: &str) -> Option<u64> {
    parse_otime_in(date, time, Local)
}

/// Parses one line of `btrfs subvolume list -s -r -q -u` output.
pub fn parse_list_line(line: &str) -> ArchiveResult<ListedSnapshot> {
    let (fields, rel_path) = line
        .split_once(" path ")
        .ok_or_else(|| inspect_error(format!("no path in: {}", line)))?;
    let tokens: Vec<&str> = fields.split_whitespace().collect();
    let after = |key: &str| {
        tokens
            .iter()
            .position(|t| *t == key)
            .and_then(|i| tokens.get(i + 1..))
    };

    let id = after("ID")
        .and_then(|rest| rest.first())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| inspect_error(format!("no ID in: {}", line)))?;
    let otime = after("otime")
        .and_then(|rest| parse_otime(rest.first()?, rest.get(1)?))
        .ok_or_else(|| inspect_error(format!("no otime in: {}", line)))?;
    let parent_uuid = after("parent_uuid")
        .and_then(|rest| rest.first())
        .filter(|v| **v != "-")
        .map(|v| v.to_string());

    Ok(ListedSnapshot {
        id,
        otime,
        parent_uuid,
        rel_path: rel_path.trim().trim_start_matches("<FS_TREE>/").to_string(),
    })
}

/// Filesystem root: `path` with its top-level-relative suffix removed.
pub fn filesystem_root(path: &Path, rel_path: &str) -> PathBuf {
    let mut components: Vec<Component<'_>> = path.components().collect();
    let depth = Path::new(rel_path).components().count();
    components.truncate(components.len().saturating_sub(depth).max(1));
    components.iter().collect()
}

/// Builds the lineage of `info` from listed snapshots, oldest first.
pub fn lineage_from(info: &SubvolumeInfo, root: &Path, listed: Vec<ListedSnapshot>) -> Vec<Snapshot> {
    let mut lineage: Vec<ListedSnapshot> = listed
        .into_iter()
        .filter(|s| s.parent_uuid.as_deref() == Some(info.uuid.as_str()))
        .collect();
    lineage.sort_by_key(|s| (s.otime, s.id));
    lineage
        .into_iter()
        .map(|s| {
            let abs_path = root.join(&s.rel_path);
            Snapshot::new(info.uuid.clone(), s.rel_path, abs_path, s.otime)
        })
        .collect()
}

/// Inspector backed by the `btrfs` command.
#[derive(Debug, Clone)]
pub struct BtrfsInspector {
    btrfs: PathBuf,
}

impl BtrfsInspector {
    /// Uses the given `btrfs` binary.
    pub fn new(btrfs: impl Into<PathBuf>) -> Self {
        Self { btrfs: btrfs.into() }
    }

    async fn run(&self, args: &[&str], path: &Path) -> ArchiveResult<String> {
        let output = Command::new(&self.btrfs)
            .args(args)
            .arg(path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(inspect_error(format!(
                "{} {} exited with {}: {}",
                self.btrfs.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn inspect(&self, path: &Path) -> ArchiveResult<Vec<Snapshot>> {
        let path = std::path::absolute(path)?;
        let info = parse_subvolume_show(&self.run(&["subvolume", "show"], &path).await?)?;
        let root = filesystem_root(&path, &info.rel_path);
        debug!(path = %path.display(), uuid = %info.uuid, root = %root.display(), "Inspected subvolume");

        let listing = self
            .run(&["subvolume", "list", "-s", "-r", "-q", "-u"], &path)
            .await?;
        let listed = listing
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_list_line)
            .collect::<ArchiveResult<Vec<_>>>()?;

        let lineage = lineage_from(&info, &root, listed);
        debug!(count = lineage.len(), "Found read-only snapshots");
        Ok(lineage)
    }
}

impl SnapshotInspector for BtrfsInspector {
    fn read_only_snapshots<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, ArchiveResult<Vec<Snapshot>>> {
        Box::pin(self.inspect(path))
    }
}
